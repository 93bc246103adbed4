use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(TypeFrais {
    Inscription => "inscription",
    Scolarite => "scolarite",
    Cantine => "cantine",
    Transport => "transport",
    Autre => "autre",
});

text_enum!(ModePaiement {
    Especes => "especes",
    Cheque => "cheque",
    Virement => "virement",
    Mobile => "mobile",
});

/// A student with what they owe for one school year.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Debiteur {
    pub eleve_id: i64,
    pub numero_matricule: String,
    pub nom: String,
    pub prenom: String,
    pub classe_id: i64,
    pub classe_nom: String,
    pub total_frais: i64,
    pub total_paye: i64,
    pub solde: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FinanceTotals {
    pub total_attendu: i64,
    pub total_encaisse: i64,
    pub nb_debiteurs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinanceSummary {
    pub annee_scolaire_id: i64,
    pub total_attendu: i64,
    pub total_encaisse: i64,
    pub reste_a_recouvrer: i64,
    /// Percentage of the expected amount already collected, two decimals.
    pub taux_recouvrement: f64,
    pub nb_debiteurs: i64,
}

impl FinanceSummary {
    pub fn from_totals(annee_scolaire_id: i64, totals: FinanceTotals) -> Self {
        let taux = if totals.total_attendu > 0 {
            let raw = totals.total_encaisse as f64 * 100.0 / totals.total_attendu as f64;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            annee_scolaire_id,
            total_attendu: totals.total_attendu,
            total_encaisse: totals.total_encaisse,
            reste_a_recouvrer: (totals.total_attendu - totals.total_encaisse).max(0),
            taux_recouvrement: taux,
            nb_debiteurs: totals.nb_debiteurs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaiementListItem {
    pub id: i64,
    pub eleve_id: i64,
    pub eleve_nom: String,
    pub type_frais: String,
    pub montant: i64,
    pub date_paiement: NaiveDate,
    pub mode_paiement: String,
    pub reference: Option<String>,
    pub annee_scolaire_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DebiteurListQuery {
    pub search: Option<String>,
    pub classe_id: Option<String>,
    pub annee_scolaire_id: Option<String>,
    pub page: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FinanceSummaryQuery {
    pub annee_scolaire_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaiementListQuery {
    pub search: Option<String>,
    pub eleve_id: Option<String>,
    pub type_frais: Option<String>,
    pub mode_paiement: Option<String>,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaiementForm {
    pub eleve_id: Option<i64>,
    pub type_frais: Option<String>,
    pub montant: Option<i64>,
    pub date_paiement: Option<NaiveDate>,
    pub mode_paiement: Option<String>,
    pub reference: Option<String>,
    pub annee_scolaire_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_computes_recovery_rate() {
        let summary = FinanceSummary::from_totals(
            1,
            FinanceTotals { total_attendu: 300_000, total_encaisse: 100_000, nb_debiteurs: 4 },
        );
        assert_eq!(summary.reste_a_recouvrer, 200_000);
        assert_eq!(summary.taux_recouvrement, 33.33);
    }

    #[test]
    fn summary_without_fees_has_zero_rate() {
        let summary = FinanceSummary::from_totals(
            1,
            FinanceTotals { total_attendu: 0, total_encaisse: 5_000, nb_debiteurs: 0 },
        );
        assert_eq!(summary.taux_recouvrement, 0.0);
        assert_eq!(summary.reste_a_recouvrer, 0);
    }
}
