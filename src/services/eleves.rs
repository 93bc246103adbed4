use chrono::{Datelike, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use crate::{
    db::filter::{like_pattern, ListQuery, Page},
    error::{is_unique_violation, AppError, AppResult, ValidationErrors},
    models::{
        eleve::{
            Eleve, EleveDetail, EleveForm, EleveListItem, EleveListQuery, EleveStatus, EleveSuggestion,
            InscriptionDetail, Sexe,
        },
        finance::{ModePaiement, TypeFrais},
    },
    services::{
        annees::AnneeService,
        finance::{FinanceService, PaiementFields},
        next_numero,
    },
};

pub const SUGGESTIONS_MAX: i64 = 10;
pub const SEARCH_MIN_CHARS: usize = 2;
const NAME_MAX_LEN: usize = 128;
const MATRICULE_MAX_LEN: usize = 32;

const COLUMNS: &str = "id, numero_matricule, nom, prenom, date_naissance, sexe, status, created_at";

/// Students joined with their enrollment of the active year, if any.
const CURRENT_CLASS_FROM: &str = "FROM eleves e
    LEFT JOIN inscriptions i ON i.eleve_id = e.id AND i.status = 'inscrit'
        AND i.annee_scolaire_id = (SELECT id FROM annees_scolaires WHERE active = TRUE
                                   ORDER BY date_debut DESC LIMIT 1)
    LEFT JOIN classes c ON c.id = i.classe_id";

const LIST_SELECT: &str = "e.id, e.numero_matricule, e.nom, e.prenom, e.date_naissance, e.sexe, e.status,
    c.id AS classe_id, c.nom AS classe_nom";

/// Validated identity fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EleveFields {
    pub numero_matricule: Option<String>,
    pub nom: String,
    pub prenom: String,
    pub date_naissance: NaiveDate,
    pub sexe: Sexe,
    pub status: EleveStatus,
}

fn trimmed(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn validate_identity(form: &EleveForm, today: NaiveDate) -> AppResult<EleveFields> {
    let mut errors = ValidationErrors::new();

    let nom = trimmed(&form.nom);
    let prenom = trimmed(&form.prenom);
    errors.check(nom.is_some(), "Le nom est obligatoire.");
    errors.check(prenom.is_some(), "Le prénom est obligatoire.");
    for value in [&nom, &prenom].into_iter().flatten() {
        errors.check(
            value.chars().count() <= NAME_MAX_LEN,
            format!("« {value} » dépasse {NAME_MAX_LEN} caractères."),
        );
    }

    match form.date_naissance {
        None => errors.push("La date de naissance est obligatoire."),
        Some(d) if d >= today => errors.push("La date de naissance doit être dans le passé."),
        _ => {}
    }

    let sexe = match trimmed(&form.sexe) {
        None => {
            errors.push("Le sexe est obligatoire.");
            None
        }
        Some(raw) => raw
            .to_uppercase()
            .parse::<Sexe>()
            .map_err(|_| errors.push("Le sexe doit être M ou F."))
            .ok(),
    };

    let status = match trimmed(&form.status) {
        None => Some(EleveStatus::Actif),
        Some(raw) => raw
            .parse::<EleveStatus>()
            .map_err(|_| errors.push("Le statut est invalide."))
            .ok(),
    };

    let numero_matricule = trimmed(&form.numero_matricule);
    if let Some(numero) = &numero_matricule {
        errors.check(
            numero.chars().count() <= MATRICULE_MAX_LEN,
            format!("Le matricule ne doit pas dépasser {MATRICULE_MAX_LEN} caractères."),
        );
    }

    if let Some(montant) = form.frais_inscription_paye {
        errors.check(montant >= 0, "Le montant des frais d'inscription ne peut pas être négatif.");
    }

    match (nom, prenom, form.date_naissance, sexe, status) {
        (Some(nom), Some(prenom), Some(date_naissance), Some(sexe), Some(status)) if errors.is_empty() => {
            Ok(EleveFields {
                numero_matricule,
                nom,
                prenom,
                date_naissance,
                sexe,
                status,
            })
        }
        _ => Err(errors.into_error()),
    }
}

pub struct EleveService;

impl EleveService {
    fn list_query(q: &EleveListQuery) -> ListQuery {
        let mut query = ListQuery::new(LIST_SELECT, CURRENT_CLASS_FROM, "e.id").order_by("e.nom, e.prenom");
        query
            .search(&["e.nom", "e.prenom", "e.numero_matricule"], q.search.as_deref())
            .eq_id("c.id", q.classe_id.as_deref())
            .eq_enum::<Sexe>("e.sexe", q.sexe.as_deref())
            .eq_enum::<EleveStatus>("e.status", q.status.as_deref());
        query
    }

    pub async fn list(pool: &PgPool, q: &EleveListQuery, page: i64) -> AppResult<Page<EleveListItem>> {
        Self::list_query(q).fetch_page(pool, page).await
    }

    pub async fn export_rows(pool: &PgPool, q: &EleveListQuery) -> AppResult<Vec<EleveListItem>> {
        Self::list_query(q).fetch_all(pool).await
    }

    /// Autocomplete among active students.
    pub async fn search(pool: &PgPool, term: Option<&str>) -> AppResult<Vec<EleveSuggestion>> {
        let term = term.map(str::trim).unwrap_or_default();
        if term.chars().count() < SEARCH_MIN_CHARS {
            return Ok(Vec::new());
        }

        let suggestions = sqlx::query_as::<_, EleveSuggestion>(&format!(
            "SELECT e.id, e.numero_matricule, e.nom, e.prenom, c.nom AS classe
             {CURRENT_CLASS_FROM}
             WHERE e.status = 'actif'
               AND (e.nom ILIKE $1 OR e.prenom ILIKE $1 OR e.numero_matricule ILIKE $1
                    OR (e.prenom || ' ' || e.nom) ILIKE $1)
             ORDER BY e.nom, e.prenom, e.id
             LIMIT $2"
        ))
        .bind(like_pattern(term))
        .bind(SUGGESTIONS_MAX)
        .fetch_all(pool)
        .await?;
        Ok(suggestions)
    }

    async fn find(pool: &PgPool, id: i64) -> AppResult<Eleve> {
        sqlx::query_as::<_, Eleve>(&format!("SELECT {COLUMNS} FROM eleves WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Élève introuvable"))
    }

    pub async fn get(pool: &PgPool, id: i64) -> AppResult<EleveDetail> {
        let eleve = Self::find(pool, id).await?;

        let inscriptions = sqlx::query_as::<_, InscriptionDetail>(
            "SELECT i.id, i.classe_id, c.nom AS classe_nom, i.annee_scolaire_id, a.libelle AS annee_libelle,
                    i.date_inscription, i.status
             FROM inscriptions i
             JOIN classes c ON c.id = i.classe_id
             JOIN annees_scolaires a ON a.id = i.annee_scolaire_id
             WHERE i.eleve_id = $1
             ORDER BY a.date_debut DESC, i.id DESC",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        let solde = match AnneeService::active_id(pool).await? {
            Some(annee_id) => FinanceService::solde(pool, id, annee_id).await?,
            None => None,
        };

        Ok(EleveDetail {
            eleve,
            inscriptions,
            solde,
        })
    }

    /// Register a student, optionally enroll them in a class of the active
    /// year and record the registration fee, all or nothing.
    pub async fn create(pool: &PgPool, form: &EleveForm) -> AppResult<Eleve> {
        let today = Utc::now().date_naive();
        let fields = validate_identity(form, today)?;
        let frais = form.frais_inscription_paye.filter(|m| *m > 0);

        let annee_id = if form.classe_id.is_some() || frais.is_some() {
            Some(AnneeService::require_active(pool).await?)
        } else {
            None
        };

        let mut tx = pool.begin().await?;

        let eleve = Self::insert(&mut *tx, &fields, today.year()).await?;

        if let (Some(classe_id), Some(annee_id)) = (form.classe_id, annee_id) {
            Self::enroll(&mut *tx, eleve.id, classe_id, annee_id).await?;
        }

        if let (Some(montant), Some(annee_id)) = (frais, annee_id) {
            let paiement = PaiementFields {
                eleve_id: eleve.id,
                type_frais: TypeFrais::Inscription,
                montant,
                date_paiement: today,
                mode_paiement: ModePaiement::Especes,
                reference: None,
            };
            FinanceService::insert_paiement(&mut *tx, &paiement, annee_id).await?;
        }

        tx.commit().await?;
        Ok(eleve)
    }

    /// Insert the student row, generating `EL-<year>-<seq>` when no
    /// registration number was given.
    pub(crate) async fn insert(conn: &mut PgConnection, fields: &EleveFields, year: i32) -> AppResult<Eleve> {
        let matricule = match &fields.numero_matricule {
            Some(m) => m.clone(),
            None => {
                // Serializes number generation until the transaction ends.
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext('eleves.numero_matricule'))")
                    .execute(&mut *conn)
                    .await?;
                next_numero(&mut *conn, "eleves", "numero_matricule", "EL", year).await?
            }
        };

        let result = sqlx::query_as::<_, Eleve>(&format!(
            "INSERT INTO eleves (numero_matricule, nom, prenom, date_naissance, sexe, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        ))
        .bind(&matricule)
        .bind(&fields.nom)
        .bind(&fields.prenom)
        .bind(fields.date_naissance)
        .bind(fields.sexe.as_str())
        .bind(fields.status.as_str())
        .fetch_one(&mut *conn)
        .await;

        match result {
            Ok(eleve) => Ok(eleve),
            Err(e) if is_unique_violation(&e) => Err(AppError::validation(format!(
                "Le matricule « {matricule} » est déjà attribué."
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Enroll a student in a class of `annee_id`, enforcing the class
    /// capacity. The class row is locked so concurrent enrollments cannot
    /// both take the last seat.
    pub(crate) async fn enroll(
        conn: &mut PgConnection,
        eleve_id: i64,
        classe_id: i64,
        annee_id: i64,
    ) -> AppResult<()> {
        let classe: Option<(String, i32, i64)> = sqlx::query_as(
            "SELECT nom, capacite_max, annee_scolaire_id FROM classes WHERE id = $1 FOR UPDATE",
        )
        .bind(classe_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some((nom, capacite_max, classe_annee)) = classe else {
            return Err(AppError::validation("La classe sélectionnée n'existe pas."));
        };
        if classe_annee != annee_id {
            return Err(AppError::validation(format!(
                "La classe « {nom} » n'appartient pas à l'année scolaire active."
            )));
        }

        let effectif: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inscriptions WHERE classe_id = $1 AND status = 'inscrit'",
        )
        .bind(classe_id)
        .fetch_one(&mut *conn)
        .await?;
        if effectif >= i64::from(capacite_max) {
            return Err(AppError::validation(format!(
                "La classe « {nom} » est complète ({capacite_max} places)."
            )));
        }

        let result = sqlx::query(
            "INSERT INTO inscriptions (eleve_id, classe_id, annee_scolaire_id) VALUES ($1, $2, $3)",
        )
        .bind(eleve_id)
        .bind(classe_id)
        .bind(annee_id)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::validation(
                "L'élève est déjà inscrit pour cette année scolaire.",
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Identity fields and status; fields missing from the form keep their
    /// current value.
    pub async fn update(pool: &PgPool, id: i64, form: &EleveForm) -> AppResult<Eleve> {
        let current = Self::find(pool, id).await?;
        let merged = EleveForm {
            numero_matricule: form.numero_matricule.clone().or(Some(current.numero_matricule.clone())),
            nom: form.nom.clone().or(Some(current.nom)),
            prenom: form.prenom.clone().or(Some(current.prenom)),
            date_naissance: form.date_naissance.or(Some(current.date_naissance)),
            sexe: form.sexe.clone().or(Some(current.sexe)),
            status: form.status.clone().or(Some(current.status)),
            classe_id: None,
            frais_inscription_paye: None,
        };
        let fields = validate_identity(&merged, Utc::now().date_naive())?;
        let matricule = fields.numero_matricule.unwrap_or(current.numero_matricule);

        let result = sqlx::query_as::<_, Eleve>(&format!(
            "UPDATE eleves
             SET numero_matricule = $1, nom = $2, prenom = $3, date_naissance = $4, sexe = $5, status = $6
             WHERE id = $7
             RETURNING {COLUMNS}"
        ))
        .bind(&matricule)
        .bind(&fields.nom)
        .bind(&fields.prenom)
        .bind(fields.date_naissance)
        .bind(fields.sexe.as_str())
        .bind(fields.status.as_str())
        .bind(id)
        .fetch_one(pool)
        .await;

        match result {
            Ok(eleve) => Ok(eleve),
            Err(e) if is_unique_violation(&e) => Err(AppError::validation(format!(
                "Le matricule « {matricule} » est déjà attribué."
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Current class of a student for the active year.
    pub async fn current_classe(pool: &PgPool, eleve_id: i64) -> AppResult<Option<i64>> {
        let classe_id = sqlx::query_scalar::<_, Option<i64>>(&format!(
            "SELECT c.id {CURRENT_CLASS_FROM} WHERE e.id = $1"
        ))
        .bind(eleve_id)
        .fetch_optional(pool)
        .await?
        .flatten();
        Ok(classe_id)
    }

    pub async fn exists(pool: &PgPool, eleve_id: i64) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM eleves WHERE id = $1)")
            .bind(eleve_id)
            .fetch_one(pool)
            .await?;
        Ok(found)
    }
}
