use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::{
    db::filter::parse_page,
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        discipline::{IncidentDetail, IncidentForm, IncidentListQuery},
        BulkRequest, StatusChangeRequest,
    },
    routes::{client_ip, created},
    services::{
        audit::{self, AuditEntry},
        export::{self, ExportFormat},
        incidents::IncidentService,
    },
    AppState,
};

pub async fn list_incidents(
    State(state): State<AppState>,
    Query(q): Query<IncidentListQuery>,
) -> AppResult<Response> {
    let layout = state.layout.incidents;
    if let Some(format) = ExportFormat::from_query(q.format.as_deref()) {
        let rows = IncidentService::export_rows(&state.db, layout, &q).await?;
        let file = export::render(format, &state.config.school_name, "Incidents disciplinaires", "incidents", &rows)?;
        return Ok(file.into_response());
    }

    let page = parse_page(q.page.as_deref());
    Ok(Json(IncidentService::list(&state.db, layout, &q, page).await?).into_response())
}

pub async fn get_incident(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<IncidentDetail>> {
    Ok(Json(IncidentService::get(&state.db, state.layout, id).await?))
}

pub async fn create_incident(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<IncidentForm>,
) -> AppResult<Response> {
    let incident = IncidentService::create(&state.db, state.layout.incidents, user.user_id, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "incident.create", "incident", incident.id)
            .details(format!("{} ({})", incident.eleve_nom, incident.gravite))
            .ip(client_ip(&headers)),
    );
    Ok(created(format!("/incidents/{}", incident.id), incident))
}

pub async fn change_incident_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<StatusChangeRequest>,
) -> AppResult<Json<Value>> {
    let status = IncidentService::change_status(&state.db, id, &body.status).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "incident.status", "incident", id)
            .details(status.to_string())
            .ip(client_ip(&headers)),
    );
    Ok(Json(json!({ "id": id, "status": status })))
}

pub async fn bulk_incidents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<Value>> {
    let affected = IncidentService::bulk(&state.db, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::bulk(user.user_id, &format!("incident.bulk.{}", body.action.trim()), "incident")
            .details(format!("{affected} incident(s) : {:?}", body.clean_ids()))
            .ip(client_ip(&headers)),
    );
    Ok(Json(json!({ "affected": affected })))
}
