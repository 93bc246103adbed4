use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(DestinataireType {
    Individuel => "individuel",
    Classe => "classe",
    Tous => "tous",
    Personnalise => "personnalise",
});

text_enum!(TypeMessage {
    Information => "information",
    Convocation => "convocation",
    Rappel => "rappel",
    Urgence => "urgence",
});

text_enum!(Priorite { Basse => "basse", Normale => "normale", Haute => "haute" });

text_enum!(MessageStatus {
    Brouillon => "brouillon",
    Programme => "programme",
    Envoye => "envoye",
    Lu => "lu",
    Archive => "archive",
});

impl MessageStatus {
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (Brouillon, Envoye) | (Brouillon, Programme) => true,
            (Programme, Envoye) => true,
            (Envoye, Lu) => true,
            (Archive, _) => false,
            (_, Archive) => true,
            _ => false,
        }
    }

    /// Drafts and scheduled messages are not visible to recipients yet.
    pub fn is_delivered(self) -> bool {
        matches!(self, MessageStatus::Envoye | MessageStatus::Lu | MessageStatus::Archive)
    }
}

text_enum!(MessageBulkAction {
    MarquerLu => "marquer_lu",
    Archiver => "archiver",
    Supprimer => "supprimer",
});

text_enum!(
    /// Which side of the mailbox a list shows.
    Boite { Recus => "recus", Envoyes => "envoyes" }
);

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub expediteur_id: i64,
    pub destinataire_type: String,
    pub destinataire_id: Option<i64>,
    pub sujet: String,
    pub contenu: String,
    pub type_message: String,
    pub priorite: String,
    pub status: String,
    pub programme: bool,
    pub date_programmee: Option<DateTime<Utc>>,
    pub date_envoi: Option<DateTime<Utc>>,
    pub date_lecture: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageListItem {
    pub id: i64,
    pub expediteur_id: i64,
    pub expediteur_nom: String,
    pub destinataire_type: String,
    pub destinataire_id: Option<i64>,
    pub sujet: String,
    pub type_message: String,
    pub priorite: String,
    pub status: String,
    pub date_programmee: Option<DateTime<Utc>>,
    pub date_envoi: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub type_message: Option<String>,
    pub priorite: Option<String>,
    pub boite: Option<String>,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageForm {
    pub destinataire_type: Option<String>,
    pub destinataire_id: Option<i64>,
    /// Recipient user ids for `personnalise`.
    #[serde(default)]
    pub destinataires: Vec<i64>,
    pub sujet: Option<String>,
    pub contenu: Option<String>,
    pub type_message: Option<String>,
    pub priorite: Option<String>,
    /// `false` saves a draft.
    #[serde(default = "default_true")]
    pub envoyer: bool,
    #[serde(default)]
    pub programme: bool,
    pub date_programmee: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lifecycle() {
        use MessageStatus::*;
        assert!(Brouillon.can_transition_to(Envoye));
        assert!(Brouillon.can_transition_to(Programme));
        assert!(Programme.can_transition_to(Envoye));
        assert!(Envoye.can_transition_to(Lu));
        assert!(Lu.can_transition_to(Archive));
        assert!(Brouillon.can_transition_to(Archive));
        assert!(!Lu.can_transition_to(Envoye));
        assert!(!Archive.can_transition_to(Envoye));
        assert!(!Archive.can_transition_to(Archive));
        assert!(!Envoye.can_transition_to(Brouillon));
    }

    #[test]
    fn drafts_are_not_delivered() {
        assert!(!MessageStatus::Brouillon.is_delivered());
        assert!(!MessageStatus::Programme.is_delivered());
        assert!(MessageStatus::Envoye.is_delivered());
    }
}
