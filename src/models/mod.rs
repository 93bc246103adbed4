use serde::{Deserialize, Deserializer};

/// Declares a text-backed enumeration stored as `TEXT` in the database, with
/// `Display`/`FromStr` on the stored spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(anyhow::anyhow!(concat!("Unknown ", stringify!($name), ": {}"), s)),
                }
            }
        }
    };
}

pub mod admission;
pub mod annee;
pub mod auth;
pub mod classe;
pub mod discipline;
pub mod eleve;
pub mod finance;
pub mod message;
pub mod user;

/// Body of every bulk endpoint: the selected ids and the action key.
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub ids: Vec<i64>,
    pub action: String,
    /// Target status for `changer_statut`.
    pub status: Option<String>,
}

impl BulkRequest {
    /// Selected ids, without non-positive values or duplicates.
    pub fn clean_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.ids.iter().copied().filter(|id| *id > 0).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Tells an explicit `null` apart from an absent field: absent stays `None`
/// (with `#[serde(default)]`), `null` becomes `Some(None)`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Single-record status change.
#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    text_enum!(Couleur { Rouge => "rouge", VertClair => "vert_clair" });

    #[test]
    fn text_enum_round_trips_stored_spelling() {
        assert_eq!("vert_clair".parse::<Couleur>().unwrap(), Couleur::VertClair);
        assert_eq!(Couleur::Rouge.to_string(), "rouge");
        assert!("Rouge".parse::<Couleur>().is_err());
        assert_eq!(Couleur::ALL.len(), 2);
    }

    #[test]
    fn bulk_ids_are_cleaned() {
        let req = BulkRequest {
            ids: vec![5, 0, 3, -2, 5, 9],
            action: "archiver".into(),
            status: None,
        };
        assert_eq!(req.clean_ids(), vec![3, 5, 9]);
    }
}
