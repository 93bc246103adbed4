use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::{
    db::filter::{like_prefix, non_empty, FilterValue, ListQuery, Page},
    error::AppResult,
};

/// An audit log entry to record.
pub struct AuditEntry {
    pub utilisateur_id: Option<i64>,
    pub action: String,
    pub ressource_type: Option<String>,
    pub ressource_id: Option<i64>,
    pub details: Option<String>,
    pub adresse_ip: Option<String>,
}

impl AuditEntry {
    pub fn new(utilisateur_id: i64, action: &str, ressource_type: &str, ressource_id: i64) -> Self {
        Self {
            utilisateur_id: Some(utilisateur_id),
            action: action.to_string(),
            ressource_type: Some(ressource_type.to_string()),
            ressource_id: Some(ressource_id),
            details: None,
            adresse_ip: None,
        }
    }

    /// Entry for an action spanning several records.
    pub fn bulk(utilisateur_id: i64, action: &str, ressource_type: &str) -> Self {
        Self {
            ressource_id: None,
            ..Self::new(utilisateur_id, action, ressource_type, 0)
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.adresse_ip = ip;
        self
    }
}

/// Fire-and-forget audit log entry.
/// Spawns a background task, never blocks the request handler and never
/// propagates errors (logs a warning on failure).
pub fn log(pool: PgPool, entry: AuditEntry) {
    tokio::spawn(async move {
        let res = sqlx::query(
            "INSERT INTO journal_actions
                (utilisateur_id, action, ressource_type, ressource_id, details, adresse_ip)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.utilisateur_id)
        .bind(&entry.action)
        .bind(entry.ressource_type)
        .bind(entry.ressource_id)
        .bind(entry.details)
        .bind(entry.adresse_ip)
        .execute(&pool)
        .await;

        if let Err(e) = res {
            tracing::warn!("audit log insert failed for action {}: {e}", entry.action);
        }
    });
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditLogRow {
    pub id: i64,
    pub utilisateur_id: Option<i64>,
    pub utilisateur_nom: Option<String>,
    pub action: String,
    pub ressource_type: Option<String>,
    pub ressource_id: Option<i64>,
    pub details: Option<String>,
    pub adresse_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn list_query(action_prefix: Option<&str>) -> ListQuery {
    let mut query = ListQuery::new(
        "j.id, j.utilisateur_id, u.prenom || ' ' || u.nom AS utilisateur_nom, j.action,
         j.ressource_type, j.ressource_id, j.details, j.adresse_ip, j.created_at",
        "FROM journal_actions j LEFT JOIN utilisateurs u ON u.id = j.utilisateur_id",
        "j.id",
    )
    .order_by("j.created_at DESC");

    if let Some(prefix) = non_empty(action_prefix) {
        query.raw("j.action LIKE ?", vec![FilterValue::Text(like_prefix(prefix))]);
    }
    query
}

pub async fn list(pool: &PgPool, action_prefix: Option<&str>, page: i64) -> AppResult<Page<AuditLogRow>> {
    list_query(action_prefix).fetch_page(pool, page).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_filter_is_a_literal_prefix() {
        let (sql, params) = list_query(Some("classe_")).count_sql();
        assert!(sql.ends_with("WHERE (j.action LIKE $1)"));
        assert_eq!(params, vec![FilterValue::Text("classe\\_%".into())]);
    }

    #[test]
    fn blank_action_is_ignored() {
        let (sql, params) = list_query(Some("  ")).count_sql();
        assert!(!sql.contains("WHERE"));
        assert!(params.is_empty());
    }
}
