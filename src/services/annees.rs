use sqlx::{PgExecutor, PgPool};

use crate::{
    error::{is_unique_violation, AppError, AppResult, ValidationErrors},
    models::annee::{AnneeScolaire, CreateAnneeRequest},
};

const COLUMNS: &str = "id, libelle, date_debut, date_fin, active, created_at";

pub struct AnneeService;

impl AnneeService {
    pub async fn list(pool: &PgPool) -> AppResult<Vec<AnneeScolaire>> {
        let annees = sqlx::query_as::<_, AnneeScolaire>(&format!(
            "SELECT {COLUMNS} FROM annees_scolaires ORDER BY date_debut DESC, id DESC"
        ))
        .fetch_all(pool)
        .await?;
        Ok(annees)
    }

    /// Id of the active school year, if one is marked active.
    pub async fn active_id<'e>(executor: impl PgExecutor<'e>) -> AppResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM annees_scolaires WHERE active = TRUE ORDER BY date_debut DESC LIMIT 1",
        )
        .fetch_optional(executor)
        .await?;
        Ok(id)
    }

    /// Like [`AnneeService::active_id`] but a missing active year is a
    /// user-facing error.
    pub async fn require_active<'e>(executor: impl PgExecutor<'e>) -> AppResult<i64> {
        Self::active_id(executor).await?.ok_or_else(|| {
            AppError::validation("Aucune année scolaire active. Activez une année scolaire d'abord.")
        })
    }

    pub async fn exists(pool: &PgPool, id: i64) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM annees_scolaires WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(found)
    }

    pub async fn create(pool: &PgPool, req: &CreateAnneeRequest) -> AppResult<AnneeScolaire> {
        let libelle = req.libelle.trim();
        let mut errors = ValidationErrors::new();
        errors.check(!libelle.is_empty(), "Le libellé est obligatoire.");
        errors.check(
            req.date_fin > req.date_debut,
            "La date de fin doit être postérieure à la date de début.",
        );
        errors.into_result()?;

        let result = sqlx::query_as::<_, AnneeScolaire>(&format!(
            "INSERT INTO annees_scolaires (libelle, date_debut, date_fin)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        ))
        .bind(libelle)
        .bind(req.date_debut)
        .bind(req.date_fin)
        .fetch_one(pool)
        .await;

        match result {
            Ok(annee) => Ok(annee),
            Err(e) if is_unique_violation(&e) => Err(AppError::validation(format!(
                "L'année scolaire « {libelle} » existe déjà."
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Make `id` the only active year.
    pub async fn activate(pool: &PgPool, id: i64) -> AppResult<AnneeScolaire> {
        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE annees_scolaires SET active = FALSE WHERE active = TRUE AND id <> $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let annee = sqlx::query_as::<_, AnneeScolaire>(&format!(
            "UPDATE annees_scolaires SET active = TRUE WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Année scolaire introuvable"))?;

        tx.commit().await?;
        Ok(annee)
    }
}
