use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(AdmissionStatus {
    EnAttente => "en_attente",
    Acceptee => "acceptee",
    Refusee => "refusee",
    Inscrit => "inscrit",
});

impl AdmissionStatus {
    /// Transitions reachable through `PUT /admissions/{id}/statut`.
    /// `inscrit` is only reached by the enroll operation.
    pub fn can_transition_to(self, next: AdmissionStatus) -> bool {
        use AdmissionStatus::*;
        matches!(
            (self, next),
            (EnAttente, Acceptee) | (EnAttente, Refusee) | (Acceptee, Refusee)
        )
    }
}

text_enum!(PrioriteAdmission {
    Normale => "normale",
    Haute => "haute",
    Urgente => "urgente",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DemandeAdmission {
    pub id: i64,
    pub numero_demande: String,
    pub nom_eleve: String,
    pub prenom_eleve: String,
    pub date_naissance: NaiveDate,
    pub sexe: String,
    pub classe_demandee_id: i64,
    pub classe_nom: String,
    pub nom_parent: String,
    pub telephone_parent: Option<String>,
    pub email_parent: Option<String>,
    pub status: String,
    pub priorite: String,
    pub commentaire: Option<String>,
    pub eleve_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdmissionListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub classe_demandee_id: Option<String>,
    pub priorite: Option<String>,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    pub page: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdmissionForm {
    pub nom_eleve: Option<String>,
    pub prenom_eleve: Option<String>,
    pub date_naissance: Option<NaiveDate>,
    pub sexe: Option<String>,
    pub classe_demandee_id: Option<i64>,
    pub nom_parent: Option<String>,
    pub telephone_parent: Option<String>,
    pub email_parent: Option<String>,
    pub priorite: Option<String>,
    pub commentaire: Option<String>,
}

/// `ADM-2026-0042`, `EL-2026-0007`: prefix, year, zero-padded sequence.
pub fn format_numero(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{prefix}-{year}-{sequence:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numero_is_zero_padded() {
        assert_eq!(format_numero("ADM", 2026, 7), "ADM-2026-0007");
        assert_eq!(format_numero("EL", 2025, 12345), "EL-2025-12345");
    }

    #[test]
    fn admission_transitions() {
        use AdmissionStatus::*;
        assert!(EnAttente.can_transition_to(Acceptee));
        assert!(EnAttente.can_transition_to(Refusee));
        assert!(Acceptee.can_transition_to(Refusee));
        assert!(!Acceptee.can_transition_to(Inscrit));
        assert!(!Refusee.can_transition_to(Acceptee));
        assert!(!Inscrit.can_transition_to(EnAttente));
    }
}
