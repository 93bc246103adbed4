use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::layout::SanctionLayout;

text_enum!(Gravite {
    Legere => "legere",
    Moyenne => "moyenne",
    Grave => "grave",
    TresGrave => "tres_grave",
});

text_enum!(IncidentStatus {
    Nouveau => "nouveau",
    EnCours => "en_cours",
    Resolu => "resolu",
    Archive => "archive",
});

impl IncidentStatus {
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Nouveau, EnCours)
                | (Nouveau, Resolu)
                | (Nouveau, Archive)
                | (EnCours, Resolu)
                | (EnCours, Archive)
                | (Resolu, Archive)
                | (Resolu, EnCours)
        )
    }
}

text_enum!(IncidentBulkAction {
    ChangerStatut => "changer_statut",
    Archiver => "archiver",
    Supprimer => "supprimer",
});

text_enum!(SanctionBulkAction {
    Terminer => "terminer",
    Annuler => "annuler",
    Supprimer => "supprimer",
});

text_enum!(
    /// Union of both layouts' vocabularies; [`SanctionStatus::allowed`] narrows
    /// it to one layout.
    SanctionStatus {
        Active => "active",
        Terminee => "terminee",
        Suspendue => "suspendue",
        Annulee => "annulee",
        Levee => "levee",
    }
);

impl SanctionStatus {
    pub fn allowed(layout: SanctionLayout) -> &'static [SanctionStatus] {
        use SanctionStatus::*;
        match layout {
            SanctionLayout::Typed => &[Active, Terminee, Suspendue, Annulee],
            SanctionLayout::Legacy => &[Active, Levee],
        }
    }

    pub fn is_allowed(self, layout: SanctionLayout) -> bool {
        Self::allowed(layout).contains(&self)
    }

    /// Status a sanction ends in when it is served.
    pub fn finished(layout: SanctionLayout) -> SanctionStatus {
        match layout {
            SanctionLayout::Typed => SanctionStatus::Terminee,
            SanctionLayout::Legacy => SanctionStatus::Levee,
        }
    }

    pub fn can_transition_to(self, next: SanctionStatus, layout: SanctionLayout) -> bool {
        use SanctionStatus::*;
        if !self.is_allowed(layout) || !next.is_allowed(layout) {
            return false;
        }
        match layout {
            SanctionLayout::Typed => matches!(
                (self, next),
                (Active, Terminee)
                    | (Active, Suspendue)
                    | (Active, Annulee)
                    | (Suspendue, Active)
                    | (Suspendue, Annulee)
            ),
            SanctionLayout::Legacy => matches!((self, next), (Active, Levee)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IncidentListItem {
    pub id: i64,
    pub eleve_id: i64,
    pub eleve_nom: String,
    pub classe_id: Option<i64>,
    pub classe_nom: Option<String>,
    pub date_incident: NaiveDate,
    pub lieu: Option<String>,
    pub description: String,
    pub temoins: Option<String>,
    pub gravite: String,
    pub status: String,
    pub rapporte_par: Option<i64>,
    pub rapporte_par_nom: Option<String>,
    pub nb_sanctions: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct IncidentDetail {
    #[serde(flatten)]
    pub incident: IncidentListItem,
    pub sanctions: Vec<SanctionListItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncidentListQuery {
    pub search: Option<String>,
    pub gravite: Option<String>,
    pub status: Option<String>,
    pub classe_id: Option<String>,
    pub eleve_id: Option<String>,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    pub page: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncidentForm {
    pub eleve_id: Option<i64>,
    pub classe_id: Option<i64>,
    pub date_incident: Option<NaiveDate>,
    pub lieu: Option<String>,
    pub description: Option<String>,
    pub temoins: Option<String>,
    pub gravite: Option<String>,
    /// Reporting staff member; defaults to the caller's staff record. Ignored
    /// when the incidents table has no reporter column.
    pub rapporte_par: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SanctionListItem {
    pub id: i64,
    pub eleve_id: i64,
    pub eleve_nom: String,
    pub incident_id: Option<i64>,
    pub type_sanction_id: Option<i64>,
    pub type_libelle: Option<String>,
    pub date_sanction: NaiveDate,
    pub date_debut: NaiveDate,
    pub date_fin: NaiveDate,
    pub duree_jours: i32,
    pub motif: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TypeSanction {
    pub id: Option<i64>,
    pub nom: String,
    pub description: Option<String>,
    pub duree_defaut_jours: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SanctionListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    /// Type id on the typed layout, type label on the legacy one.
    #[serde(rename = "type")]
    pub type_sanction: Option<String>,
    pub eleve_id: Option<String>,
    pub incident_id: Option<String>,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    pub page: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SanctionForm {
    pub eleve_id: Option<i64>,
    pub incident_id: Option<i64>,
    pub type_sanction_id: Option<i64>,
    /// Free-text type, legacy layout.
    pub type_sanction: Option<String>,
    pub date_sanction: Option<NaiveDate>,
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
    pub duree_jours: Option<i32>,
    pub motif: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_transitions() {
        use IncidentStatus::*;
        assert!(Nouveau.can_transition_to(EnCours));
        assert!(EnCours.can_transition_to(Resolu));
        assert!(Resolu.can_transition_to(EnCours));
        assert!(Resolu.can_transition_to(Archive));
        assert!(!Archive.can_transition_to(Nouveau));
        assert!(!EnCours.can_transition_to(Nouveau));
        assert!(!Nouveau.can_transition_to(Nouveau));
    }

    #[test]
    fn sanction_vocabulary_depends_on_layout() {
        assert!(SanctionStatus::Terminee.is_allowed(SanctionLayout::Typed));
        assert!(!SanctionStatus::Terminee.is_allowed(SanctionLayout::Legacy));
        assert!(SanctionStatus::Levee.is_allowed(SanctionLayout::Legacy));
        assert!(!SanctionStatus::Levee.is_allowed(SanctionLayout::Typed));
        assert_eq!(SanctionStatus::finished(SanctionLayout::Typed), SanctionStatus::Terminee);
        assert_eq!(SanctionStatus::finished(SanctionLayout::Legacy), SanctionStatus::Levee);
    }

    #[test]
    fn sanction_transitions() {
        use SanctionStatus::*;
        let typed = SanctionLayout::Typed;
        assert!(Active.can_transition_to(Suspendue, typed));
        assert!(Suspendue.can_transition_to(Active, typed));
        assert!(!Terminee.can_transition_to(Active, typed));
        assert!(!Active.can_transition_to(Levee, typed));

        let legacy = SanctionLayout::Legacy;
        assert!(Active.can_transition_to(Levee, legacy));
        assert!(!Active.can_transition_to(Annulee, legacy));
        assert!(!Levee.can_transition_to(Active, legacy));
    }
}
