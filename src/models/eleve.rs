use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(Sexe { Masculin => "M", Feminin => "F" });

text_enum!(EleveStatus { Actif => "actif", Inactif => "inactif" });

text_enum!(InscriptionStatus {
    Inscrit => "inscrit",
    Transfere => "transfere",
    Abandonne => "abandonne",
});

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Eleve {
    pub id: i64,
    pub numero_matricule: String,
    pub nom: String,
    pub prenom: String,
    pub date_naissance: NaiveDate,
    pub sexe: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EleveListItem {
    pub id: i64,
    pub numero_matricule: String,
    pub nom: String,
    pub prenom: String,
    pub date_naissance: NaiveDate,
    pub sexe: String,
    pub status: String,
    pub classe_id: Option<i64>,
    pub classe_nom: Option<String>,
}

/// Autocomplete entry returned by `GET /eleves/recherche`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EleveSuggestion {
    pub id: i64,
    pub numero_matricule: String,
    pub nom: String,
    pub prenom: String,
    pub classe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InscriptionDetail {
    pub id: i64,
    pub classe_id: i64,
    pub classe_nom: String,
    pub annee_scolaire_id: i64,
    pub annee_libelle: String,
    pub date_inscription: NaiveDate,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct EleveDetail {
    #[serde(flatten)]
    pub eleve: Eleve,
    pub inscriptions: Vec<InscriptionDetail>,
    /// Outstanding balance for the active year, when there is one.
    pub solde: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EleveListQuery {
    pub search: Option<String>,
    pub classe_id: Option<String>,
    pub sexe: Option<String>,
    pub status: Option<String>,
    pub page: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EleveSearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EleveForm {
    pub numero_matricule: Option<String>,
    pub nom: Option<String>,
    pub prenom: Option<String>,
    pub date_naissance: Option<NaiveDate>,
    pub sexe: Option<String>,
    pub status: Option<String>,
    /// Enroll in this class for the active year.
    pub classe_id: Option<i64>,
    /// Registration fee paid at enrollment.
    pub frais_inscription_paye: Option<i64>,
}
