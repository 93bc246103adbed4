use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    db::filter::{parse_page, Page},
    error::AppResult,
    services::audit::{self, AuditLogRow},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct JournalQuery {
    pub page: Option<String>,
    /// Action prefix, e.g. `classe.` or `message.bulk`.
    pub action: Option<String>,
}

pub async fn list_journal(
    State(state): State<AppState>,
    Query(q): Query<JournalQuery>,
) -> AppResult<Json<Page<AuditLogRow>>> {
    let page = parse_page(q.page.as_deref());
    Ok(Json(audit::list(&state.db, q.action.as_deref(), page).await?))
}
