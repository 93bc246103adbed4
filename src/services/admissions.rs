use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::{
    db::filter::{ListQuery, Page},
    error::{is_unique_violation, AppError, AppResult, ValidationErrors},
    models::{
        admission::{AdmissionForm, AdmissionListQuery, AdmissionStatus, DemandeAdmission, PrioriteAdmission},
        eleve::{EleveStatus, Sexe},
    },
    services::{
        annees::AnneeService,
        eleves::{EleveFields, EleveService},
        incidents::stale_status_error,
        metrics::ADMISSIONS_COUNTER,
        next_numero,
    },
};

/// Attempts at drawing a free application number before giving up.
const NUMERO_ATTEMPTS: usize = 5;

const SELECT: &str = "d.id, d.numero_demande, d.nom_eleve, d.prenom_eleve, d.date_naissance, d.sexe,
    d.classe_demandee_id, c.nom AS classe_nom, d.nom_parent, d.telephone_parent, d.email_parent,
    d.status, d.priorite, d.commentaire, d.eleve_id, d.created_at";

const FROM: &str = "FROM demandes_admission d JOIN classes c ON c.id = d.classe_demandee_id";

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionFields {
    pub nom_eleve: String,
    pub prenom_eleve: String,
    pub date_naissance: NaiveDate,
    pub sexe: Sexe,
    pub classe_demandee_id: i64,
    pub nom_parent: String,
    pub telephone_parent: Option<String>,
    pub email_parent: Option<String>,
    pub priorite: PrioriteAdmission,
    pub commentaire: Option<String>,
}

fn trimmed(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn validate_admission(form: &AdmissionForm, today: NaiveDate) -> AppResult<AdmissionFields> {
    let mut errors = ValidationErrors::new();

    let nom_eleve = trimmed(&form.nom_eleve);
    let prenom_eleve = trimmed(&form.prenom_eleve);
    let nom_parent = trimmed(&form.nom_parent);
    errors.check(nom_eleve.is_some(), "Le nom de l'élève est obligatoire.");
    errors.check(prenom_eleve.is_some(), "Le prénom de l'élève est obligatoire.");
    errors.check(form.classe_demandee_id.is_some(), "La classe demandée est obligatoire.");
    errors.check(nom_parent.is_some(), "Le nom du parent ou tuteur est obligatoire.");

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

    let priorite = match trimmed(&form.priorite) {
        None => Some(PrioriteAdmission::Normale),
        Some(raw) => raw
            .parse::<PrioriteAdmission>()
            .map_err(|_| errors.push("La priorité est invalide."))
            .ok(),
    };

    let email_parent = trimmed(&form.email_parent);
    if let Some(email) = &email_parent {
        errors.check(
            email.contains('@') && !email.starts_with('@') && !email.ends_with('@'),
            "L'adresse e-mail du parent est invalide.",
        );
    }

    match (nom_eleve, prenom_eleve, form.date_naissance, sexe, form.classe_demandee_id, nom_parent, priorite) {
        (
            Some(nom_eleve),
            Some(prenom_eleve),
            Some(date_naissance),
            Some(sexe),
            Some(classe_demandee_id),
            Some(nom_parent),
            Some(priorite),
        ) if errors.is_empty() => Ok(AdmissionFields {
            nom_eleve,
            prenom_eleve,
            date_naissance,
            sexe,
            classe_demandee_id,
            nom_parent,
            telephone_parent: trimmed(&form.telephone_parent),
            email_parent,
            priorite,
            commentaire: trimmed(&form.commentaire),
        }),
        _ => Err(errors.into_error()),
    }
}

pub struct AdmissionService;

impl AdmissionService {
    fn list_query(q: &AdmissionListQuery) -> ListQuery {
        let mut query = ListQuery::new(SELECT, FROM, "d.id").order_by("d.created_at DESC");
        query
            .search(&["d.nom_eleve", "d.prenom_eleve", "d.numero_demande"], q.search.as_deref())
            .eq_enum::<AdmissionStatus>("d.status", q.status.as_deref())
            .eq_id("d.classe_demandee_id", q.classe_demandee_id.as_deref())
            .eq_enum::<PrioriteAdmission>("d.priorite", q.priorite.as_deref())
            .date_from("d.created_at::date", q.date_debut.as_deref())
            .date_to("d.created_at::date", q.date_fin.as_deref());
        query
    }

    pub async fn list(pool: &PgPool, q: &AdmissionListQuery, page: i64) -> AppResult<Page<DemandeAdmission>> {
        Self::list_query(q).fetch_page(pool, page).await
    }

    pub async fn export_rows(pool: &PgPool, q: &AdmissionListQuery) -> AppResult<Vec<DemandeAdmission>> {
        Self::list_query(q).fetch_all(pool).await
    }

    pub async fn get(pool: &PgPool, id: i64) -> AppResult<DemandeAdmission> {
        sqlx::query_as::<_, DemandeAdmission>(&format!("SELECT {SELECT} {FROM} WHERE d.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Demande d'admission introuvable"))
    }

    /// Record an application under a fresh `ADM-<year>-<seq>` number. Two
    /// concurrent submissions can draw the same number; the loser retries.
    pub async fn create(pool: &PgPool, form: &AdmissionForm) -> AppResult<DemandeAdmission> {
        let today = Utc::now().date_naive();
        let fields = validate_admission(form, today)?;

        let classe_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM classes WHERE id = $1)")
            .bind(fields.classe_demandee_id)
            .fetch_one(pool)
            .await?;
        if !classe_exists {
            return Err(AppError::validation("La classe demandée n'existe pas."));
        }

        for attempt in 1..=NUMERO_ATTEMPTS {
            let numero = next_numero(pool, "demandes_admission", "numero_demande", "ADM", today.year()).await?;

            let result = sqlx::query_scalar::<_, i64>(
                "INSERT INTO demandes_admission
                    (numero_demande, nom_eleve, prenom_eleve, date_naissance, sexe, classe_demandee_id,
                     nom_parent, telephone_parent, email_parent, priorite, commentaire)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 RETURNING id",
            )
            .bind(&numero)
            .bind(&fields.nom_eleve)
            .bind(&fields.prenom_eleve)
            .bind(fields.date_naissance)
            .bind(fields.sexe.as_str())
            .bind(fields.classe_demandee_id)
            .bind(&fields.nom_parent)
            .bind(&fields.telephone_parent)
            .bind(&fields.email_parent)
            .bind(fields.priorite.as_str())
            .bind(&fields.commentaire)
            .fetch_one(pool)
            .await;

            match result {
                Ok(id) => {
                    ADMISSIONS_COUNTER
                        .with_label_values(&[fields.priorite.as_str()])
                        .inc();
                    return Self::get(pool, id).await;
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!("application number {numero} already taken (attempt {attempt})");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "no free application number after {NUMERO_ATTEMPTS} attempts"
        )))
    }

    /// Accept or refuse. Enrollment goes through [`AdmissionService::enroll`].
    pub async fn change_status(pool: &PgPool, id: i64, raw_status: &str) -> AppResult<DemandeAdmission> {
        let next = raw_status
            .trim()
            .parse::<AdmissionStatus>()
            .map_err(|_| AppError::validation("Le statut sélectionné est invalide."))?;

        let demande = Self::get(pool, id).await?;
        let current: AdmissionStatus = demande.status.parse()?;
        if !current.can_transition_to(next) {
            return Err(AppError::validation(format!(
                "Transition de statut impossible : {current} → {next}."
            )));
        }

        let result = sqlx::query("UPDATE demandes_admission SET status = $1 WHERE id = $2 AND status = $3")
            .bind(next.as_str())
            .bind(id)
            .bind(current.as_str())
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(stale_status_error());
        }
        Self::get(pool, id).await
    }

    /// Turn an accepted application into a student enrolled in the requested
    /// class for the active year.
    pub async fn enroll(pool: &PgPool, id: i64) -> AppResult<DemandeAdmission> {
        let annee_id = AnneeService::require_active(pool).await?;
        let today = Utc::now().date_naive();

        let mut tx = pool.begin().await?;

        let demande = sqlx::query_as::<_, DemandeAdmission>(&format!(
            "SELECT {SELECT} {FROM} WHERE d.id = $1 FOR UPDATE OF d"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Demande d'admission introuvable"))?;

        if demande.status != AdmissionStatus::Acceptee.as_str() {
            return Err(AppError::validation(
                "Seule une demande acceptée peut donner lieu à une inscription.",
            ));
        }

        let fields = EleveFields {
            numero_matricule: None,
            nom: demande.nom_eleve.clone(),
            prenom: demande.prenom_eleve.clone(),
            date_naissance: demande.date_naissance,
            sexe: demande.sexe.parse()?,
            status: EleveStatus::Actif,
        };
        let eleve = EleveService::insert(&mut *tx, &fields, today.year()).await?;
        EleveService::enroll(&mut *tx, eleve.id, demande.classe_demandee_id, annee_id).await?;

        sqlx::query("UPDATE demandes_admission SET status = 'inscrit', eleve_id = $1 WHERE id = $2")
            .bind(eleve.id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Self::get(pool, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    fn form() -> AdmissionForm {
        AdmissionForm {
            nom_eleve: Some("Mukendi".into()),
            prenom_eleve: Some("Daniel".into()),
            date_naissance: NaiveDate::from_ymd_opt(2019, 1, 30),
            sexe: Some("M".into()),
            classe_demandee_id: Some(3),
            nom_parent: Some("Mukendi Joseph".into()),
            ..Default::default()
        }
    }

    #[test]
    fn priority_defaults_to_normal() {
        let fields = validate_admission(&form(), today()).unwrap();
        assert_eq!(fields.priorite, PrioriteAdmission::Normale);
        assert_eq!(fields.sexe, Sexe::Masculin);
    }

    #[test]
    fn empty_form_reports_every_missing_field() {
        match validate_admission(&AdmissionForm::default(), today()) {
            Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 6),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_email_and_priority_are_rejected() {
        let mut f = form();
        f.email_parent = Some("parent.example.org".into());
        f.priorite = Some("immediate".into());
        match validate_admission(&f, today()) {
            Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn list_searches_names_and_number() {
        let q = AdmissionListQuery {
            search: Some("ADM-2026".into()),
            status: Some("en_attente".into()),
            ..Default::default()
        };
        let (sql, params) = AdmissionService::list_query(&q).page_sql(2);
        assert!(sql.contains(
            "WHERE (d.nom_eleve ILIKE $1 OR d.prenom_eleve ILIKE $2 OR d.numero_demande ILIKE $3) AND d.status = $4"
        ));
        assert!(sql.contains("ORDER BY d.created_at DESC, d.id ASC"));
        assert_eq!(params.len(), 6);
    }
}
