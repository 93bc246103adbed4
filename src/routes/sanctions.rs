use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::{
    db::filter::parse_page,
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        discipline::{SanctionForm, SanctionListQuery, TypeSanction},
        BulkRequest, StatusChangeRequest,
    },
    routes::client_ip,
    services::{
        audit::{self, AuditEntry},
        export::{self, ExportFormat},
        sanctions::SanctionService,
    },
    AppState,
};

pub async fn list_sanctions(
    State(state): State<AppState>,
    Query(q): Query<SanctionListQuery>,
) -> AppResult<Response> {
    let layout = state.layout.sanctions;
    if let Some(format) = ExportFormat::from_query(q.format.as_deref()) {
        let rows = SanctionService::export_rows(&state.db, layout, &q).await?;
        let file = export::render(format, &state.config.school_name, "Sanctions", "sanctions", &rows)?;
        return Ok(file.into_response());
    }

    let page = parse_page(q.page.as_deref());
    Ok(Json(SanctionService::list(&state.db, layout, &q, page).await?).into_response())
}

pub async fn list_types(State(state): State<AppState>) -> AppResult<Json<Vec<TypeSanction>>> {
    Ok(Json(SanctionService::types(&state.db, state.layout.sanctions).await?))
}

pub async fn create_sanction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<SanctionForm>,
) -> AppResult<Response> {
    let sanction = SanctionService::create(&state.db, state.layout.sanctions, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "sanction.create", "sanction", sanction.id)
            .details(format!(
                "{} : {} du {} au {}",
                sanction.eleve_nom,
                sanction.type_libelle.as_deref().unwrap_or("sanction"),
                sanction.date_debut,
                sanction.date_fin
            ))
            .ip(client_ip(&headers)),
    );
    Ok((StatusCode::CREATED, Json(sanction)).into_response())
}

pub async fn change_sanction_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<StatusChangeRequest>,
) -> AppResult<Json<Value>> {
    let status = SanctionService::change_status(&state.db, state.layout.sanctions, id, &body.status).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "sanction.status", "sanction", id)
            .details(status.to_string())
            .ip(client_ip(&headers)),
    );
    Ok(Json(json!({ "id": id, "status": status })))
}

pub async fn bulk_sanctions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<Value>> {
    let affected = SanctionService::bulk(&state.db, state.layout.sanctions, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::bulk(user.user_id, &format!("sanction.bulk.{}", body.action.trim()), "sanction")
            .details(format!("{affected} sanction(s) : {:?}", body.clean_ids()))
            .ip(client_ip(&headers)),
    );
    Ok(Json(json!({ "affected": affected })))
}
