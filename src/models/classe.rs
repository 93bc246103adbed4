use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(Niveau {
    Maternelle => "maternelle",
    Primaire => "primaire",
    Secondaire => "secondaire",
    Superieur => "superieur",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Classe {
    pub id: i64,
    pub nom: String,
    pub niveau: String,
    pub section: Option<String>,
    pub salle: Option<String>,
    pub capacite_max: i32,
    pub titulaire_id: Option<i64>,
    pub annee_scolaire_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Row of the class list: the class plus its joined labels and head count.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClasseListItem {
    pub id: i64,
    pub nom: String,
    pub niveau: String,
    pub section: Option<String>,
    pub salle: Option<String>,
    pub capacite_max: i32,
    pub titulaire_id: Option<i64>,
    pub titulaire_nom: Option<String>,
    pub annee_scolaire_id: i64,
    pub annee_libelle: String,
    pub effectif: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClasseEleve {
    pub eleve_id: i64,
    pub numero_matricule: String,
    pub nom: String,
    pub prenom: String,
    pub sexe: String,
    pub date_naissance: NaiveDate,
    pub date_inscription: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct ClasseDetail {
    #[serde(flatten)]
    pub classe: ClasseListItem,
    pub eleves: Vec<ClasseEleve>,
}

/// Raw query-string filters of `GET /classes`.
#[derive(Debug, Default, Deserialize)]
pub struct ClasseListQuery {
    pub search: Option<String>,
    pub niveau: Option<String>,
    pub annee_scolaire_id: Option<String>,
    pub titulaire_id: Option<String>,
    pub page: Option<String>,
    pub format: Option<String>,
}

/// Create/update form. Everything is optional so that missing fields are
/// reported as validation errors rather than deserialization failures.
/// On update, `null` clears a nullable column while an absent field keeps it.
#[derive(Debug, Default, Deserialize)]
pub struct ClasseForm {
    pub nom: Option<String>,
    pub niveau: Option<String>,
    #[serde(default, deserialize_with = "super::nullable")]
    pub section: Option<Option<String>>,
    #[serde(default, deserialize_with = "super::nullable")]
    pub salle: Option<Option<String>>,
    pub capacite_max: Option<i32>,
    #[serde(default, deserialize_with = "super::nullable")]
    pub titulaire_id: Option<Option<i64>>,
    pub annee_scolaire_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_told_apart_from_absent() {
        let form: ClasseForm = serde_json::from_str(r#"{"titulaire_id": null, "salle": "B12"}"#).unwrap();
        assert_eq!(form.titulaire_id, Some(None));
        assert_eq!(form.salle, Some(Some("B12".to_string())));
        assert_eq!(form.section, None);
    }
}
