use chrono::{NaiveDate, Utc};
use sqlx::PgPool;

use crate::{
    db::{
        filter::{ListQuery, Page},
        layout::{IncidentLayout, SchemaLayout},
    },
    error::{AppError, AppResult, ValidationErrors},
    models::{
        discipline::{
            Gravite, IncidentBulkAction, IncidentDetail, IncidentForm, IncidentListItem, IncidentListQuery,
            IncidentStatus,
        },
        BulkRequest,
    },
    services::{
        eleves::EleveService,
        metrics::{BULK_ACTIONS_COUNTER, INCIDENTS_COUNTER},
        parse_bulk,
        sanctions::SanctionService,
    },
};

const BASE_SELECT: &str = "i.id, i.eleve_id, e.prenom || ' ' || e.nom AS eleve_nom, i.classe_id,
    c.nom AS classe_nom, i.date_incident, i.lieu, i.description, i.temoins, i.gravite, i.status,
    (SELECT COUNT(*) FROM sanctions s WHERE s.incident_id = i.id) AS nb_sanctions, i.created_at";

const BASE_FROM: &str = "FROM incidents i
    JOIN eleves e ON e.id = i.eleve_id
    LEFT JOIN classes c ON c.id = i.classe_id";

fn list_select(layout: IncidentLayout) -> String {
    match layout {
        IncidentLayout::WithReporter => format!(
            "{BASE_SELECT}, i.rapporte_par, p.prenom || ' ' || p.nom AS rapporte_par_nom"
        ),
        IncidentLayout::Legacy => {
            format!("{BASE_SELECT}, NULL::BIGINT AS rapporte_par, NULL::TEXT AS rapporte_par_nom")
        }
    }
}

fn list_from(layout: IncidentLayout) -> String {
    match layout {
        IncidentLayout::WithReporter => {
            format!("{BASE_FROM} LEFT JOIN personnel p ON p.id = i.rapporte_par")
        }
        IncidentLayout::Legacy => BASE_FROM.to_string(),
    }
}

/// Insert statement of each table shape. The legacy shape has no reporter.
pub fn insert_sql(layout: IncidentLayout) -> &'static str {
    match layout {
        IncidentLayout::WithReporter => {
            "INSERT INTO incidents
                (eleve_id, classe_id, date_incident, lieu, description, temoins, gravite, rapporte_par)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id"
        }
        IncidentLayout::Legacy => {
            "INSERT INTO incidents
                (eleve_id, classe_id, date_incident, lieu, description, temoins, gravite)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentFields {
    pub eleve_id: i64,
    pub classe_id: Option<i64>,
    pub date_incident: NaiveDate,
    pub lieu: Option<String>,
    pub description: String,
    pub temoins: Option<String>,
    pub gravite: Gravite,
    pub rapporte_par: Option<i64>,
}

fn trimmed(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn validate_incident(form: &IncidentForm, today: NaiveDate) -> AppResult<IncidentFields> {
    let mut errors = ValidationErrors::new();

    errors.check(form.eleve_id.is_some(), "L'élève concerné est obligatoire.");

    let description = trimmed(&form.description);
    errors.check(description.is_some(), "La description de l'incident est obligatoire.");

    let date_incident = form.date_incident.unwrap_or(today);
    errors.check(date_incident <= today, "La date de l'incident ne peut pas être dans le futur.");

    let gravite = match trimmed(&form.gravite) {
        None => Some(Gravite::Legere),
        Some(raw) => raw
            .parse::<Gravite>()
            .map_err(|_| errors.push("La gravité sélectionnée est invalide."))
            .ok(),
    };

    match (form.eleve_id, description, gravite) {
        (Some(eleve_id), Some(description), Some(gravite)) if errors.is_empty() => Ok(IncidentFields {
            eleve_id,
            classe_id: form.classe_id,
            date_incident,
            lieu: trimmed(&form.lieu),
            description,
            temoins: trimmed(&form.temoins),
            gravite,
            rapporte_par: form.rapporte_par,
        }),
        _ => Err(errors.into_error()),
    }
}

pub fn transition_error(from: &str, to: &str) -> AppError {
    AppError::validation(format!("Transition de statut impossible : {from} → {to}."))
}

/// The row's status moved between the read and the conditional update.
pub fn stale_status_error() -> AppError {
    AppError::validation("Le statut a été modifié entre-temps. Rechargez la fiche puis réessayez.")
}

pub struct IncidentService;

impl IncidentService {
    fn list_query(layout: IncidentLayout, q: &IncidentListQuery) -> ListQuery {
        let mut query =
            ListQuery::new(list_select(layout), list_from(layout), "i.id").order_by("i.date_incident DESC");
        query
            .search(&["i.description", "i.lieu", "e.nom", "e.prenom"], q.search.as_deref())
            .eq_enum::<Gravite>("i.gravite", q.gravite.as_deref())
            .eq_enum::<IncidentStatus>("i.status", q.status.as_deref())
            .eq_id("i.classe_id", q.classe_id.as_deref())
            .eq_id("i.eleve_id", q.eleve_id.as_deref())
            .date_from("i.date_incident", q.date_debut.as_deref())
            .date_to("i.date_incident", q.date_fin.as_deref());
        query
    }

    pub async fn list(
        pool: &PgPool,
        layout: IncidentLayout,
        q: &IncidentListQuery,
        page: i64,
    ) -> AppResult<Page<IncidentListItem>> {
        Self::list_query(layout, q).fetch_page(pool, page).await
    }

    pub async fn export_rows(
        pool: &PgPool,
        layout: IncidentLayout,
        q: &IncidentListQuery,
    ) -> AppResult<Vec<IncidentListItem>> {
        Self::list_query(layout, q).fetch_all(pool).await
    }

    async fn find(pool: &PgPool, layout: IncidentLayout, id: i64) -> AppResult<IncidentListItem> {
        sqlx::query_as::<_, IncidentListItem>(&format!(
            "SELECT {} {} WHERE i.id = $1",
            list_select(layout),
            list_from(layout)
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Incident introuvable"))
    }

    pub async fn get(pool: &PgPool, layout: SchemaLayout, id: i64) -> AppResult<IncidentDetail> {
        let incident = Self::find(pool, layout.incidents, id).await?;
        let sanctions = SanctionService::for_incident(pool, layout.sanctions, id).await?;
        Ok(IncidentDetail { incident, sanctions })
    }

    pub async fn create(
        pool: &PgPool,
        layout: IncidentLayout,
        user_id: i64,
        form: &IncidentForm,
    ) -> AppResult<IncidentListItem> {
        let mut fields = validate_incident(form, Utc::now().date_naive())?;

        if !EleveService::exists(pool, fields.eleve_id).await? {
            return Err(AppError::validation("L'élève sélectionné n'existe pas."));
        }
        if fields.classe_id.is_none() {
            fields.classe_id = EleveService::current_classe(pool, fields.eleve_id).await?;
        }

        let id: i64 = match layout {
            IncidentLayout::WithReporter => {
                let rapporte_par = match fields.rapporte_par {
                    Some(id) => Some(id),
                    None => sqlx::query_scalar::<_, i64>(
                        "SELECT id FROM personnel WHERE utilisateur_id = $1 ORDER BY id LIMIT 1",
                    )
                    .bind(user_id)
                    .fetch_optional(pool)
                    .await?,
                };
                sqlx::query_scalar(insert_sql(layout))
                    .bind(fields.eleve_id)
                    .bind(fields.classe_id)
                    .bind(fields.date_incident)
                    .bind(&fields.lieu)
                    .bind(&fields.description)
                    .bind(&fields.temoins)
                    .bind(fields.gravite.as_str())
                    .bind(rapporte_par)
                    .fetch_one(pool)
                    .await?
            }
            IncidentLayout::Legacy => {
                sqlx::query_scalar(insert_sql(layout))
                    .bind(fields.eleve_id)
                    .bind(fields.classe_id)
                    .bind(fields.date_incident)
                    .bind(&fields.lieu)
                    .bind(&fields.description)
                    .bind(&fields.temoins)
                    .bind(fields.gravite.as_str())
                    .fetch_one(pool)
                    .await?
            }
        };

        INCIDENTS_COUNTER.with_label_values(&[fields.gravite.as_str()]).inc();
        Self::find(pool, layout, id).await
    }

    pub async fn change_status(pool: &PgPool, id: i64, raw_status: &str) -> AppResult<IncidentStatus> {
        let next = raw_status
            .trim()
            .parse::<IncidentStatus>()
            .map_err(|_| AppError::validation("Le statut sélectionné est invalide."))?;

        let current: String = sqlx::query_scalar("SELECT status FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Incident introuvable"))?;
        let current: IncidentStatus = current.parse()?;

        if !current.can_transition_to(next) {
            return Err(transition_error(current.as_str(), next.as_str()));
        }

        let result = sqlx::query("UPDATE incidents SET status = $1 WHERE id = $2 AND status = $3")
            .bind(next.as_str())
            .bind(id)
            .bind(current.as_str())
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(stale_status_error());
        }
        Ok(next)
    }

    pub async fn bulk(pool: &PgPool, req: &BulkRequest) -> AppResult<u64> {
        let (action, ids) = parse_bulk::<IncidentBulkAction>(req)?;

        let mut tx = pool.begin().await?;
        let result = match action {
            IncidentBulkAction::ChangerStatut => {
                let status = req
                    .status
                    .as_deref()
                    .map(str::trim)
                    .and_then(|s| s.parse::<IncidentStatus>().ok())
                    .ok_or_else(|| AppError::validation("Choisissez un statut valide."))?;
                sqlx::query("UPDATE incidents SET status = $2 WHERE id = ANY($1)")
                    .bind(&ids)
                    .bind(status.as_str())
                    .execute(&mut *tx)
                    .await?
            }
            IncidentBulkAction::Archiver => {
                sqlx::query("UPDATE incidents SET status = 'archive' WHERE id = ANY($1)")
                    .bind(&ids)
                    .execute(&mut *tx)
                    .await?
            }
            IncidentBulkAction::Supprimer => {
                sqlx::query("DELETE FROM incidents WHERE id = ANY($1)")
                    .bind(&ids)
                    .execute(&mut *tx)
                    .await?
            }
        };
        tx.commit().await?;

        BULK_ACTIONS_COUNTER
            .with_label_values(&["incidents", action.as_str()])
            .inc();
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 20).unwrap()
    }

    fn form() -> IncidentForm {
        IncidentForm {
            eleve_id: Some(12),
            description: Some("Bagarre dans la cour".into()),
            ..Default::default()
        }
    }

    #[test]
    fn legacy_insert_omits_reporter() {
        let legacy = insert_sql(IncidentLayout::Legacy);
        assert!(!legacy.contains("rapporte_par"));
        assert_eq!(legacy.matches('$').count(), 7);

        let current = insert_sql(IncidentLayout::WithReporter);
        assert!(current.contains("rapporte_par"));
        assert_eq!(current.matches('$').count(), 8);
    }

    #[test]
    fn legacy_list_selects_null_reporter() {
        let (sql, _) = IncidentService::list_query(IncidentLayout::Legacy, &IncidentListQuery::default()).count_sql();
        assert!(!sql.contains("personnel"));
        let (sql, _) = IncidentService::list_query(IncidentLayout::Legacy, &IncidentListQuery::default()).page_sql(1);
        assert!(sql.contains("NULL::BIGINT AS rapporte_par"));
        let (sql, _) =
            IncidentService::list_query(IncidentLayout::WithReporter, &IncidentListQuery::default()).page_sql(1);
        assert!(sql.contains("LEFT JOIN personnel p ON p.id = i.rapporte_par"));
    }

    #[test]
    fn incident_defaults() {
        let fields = validate_incident(&form(), today()).unwrap();
        assert_eq!(fields.date_incident, today());
        assert_eq!(fields.gravite, Gravite::Legere);
        assert_eq!(fields.lieu, None);
    }

    #[test]
    fn future_incident_is_rejected() {
        let mut f = form();
        f.date_incident = today().succ_opt();
        f.gravite = Some("catastrophique".into());
        match validate_incident(&f, today()) {
            Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn list_filters_in_declared_order() {
        let q = IncidentListQuery {
            gravite: Some("grave".into()),
            classe_id: Some("3".into()),
            date_debut: Some("2025-09-01".into()),
            ..Default::default()
        };
        let (sql, params) = IncidentService::list_query(IncidentLayout::WithReporter, &q).page_sql(1);
        assert!(sql.contains("WHERE i.gravite = $1 AND i.classe_id = $2 AND i.date_incident >= $3"));
        assert!(sql.contains("ORDER BY i.date_incident DESC, i.id ASC LIMIT $4 OFFSET $5"));
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn transition_error_names_both_statuses() {
        match transition_error("archive", "nouveau") {
            AppError::Validation(list) => assert_eq!(list, vec!["Transition de statut impossible : archive → nouveau."]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stale_status_is_a_validation_error() {
        match stale_status_error() {
            AppError::Validation(list) => assert!(list[0].starts_with("Le statut a été modifié entre-temps")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
