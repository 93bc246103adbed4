use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::AppResult,
    models::{
        annee::{AnneeScolaire, CreateAnneeRequest},
        auth::AuthenticatedUser,
    },
    routes::client_ip,
    services::{
        annees::AnneeService,
        audit::{self, AuditEntry},
    },
    AppState,
};

pub async fn list_annees(State(state): State<AppState>) -> AppResult<Json<Vec<AnneeScolaire>>> {
    Ok(Json(AnneeService::list(&state.db).await?))
}

pub async fn create_annee(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<CreateAnneeRequest>,
) -> AppResult<Response> {
    let annee = AnneeService::create(&state.db, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "annee.create", "annee_scolaire", annee.id)
            .details(annee.libelle.clone())
            .ip(client_ip(&headers)),
    );
    Ok((StatusCode::CREATED, Json(annee)).into_response())
}

pub async fn activate_annee(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<Json<AnneeScolaire>> {
    let annee = AnneeService::activate(&state.db, id).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "annee.activate", "annee_scolaire", annee.id)
            .details(annee.libelle.clone())
            .ip(client_ip(&headers)),
    );
    Ok(Json(annee))
}
