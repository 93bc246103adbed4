use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    db::filter::parse_page,
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        eleve::{Eleve, EleveDetail, EleveForm, EleveListQuery, EleveSearchQuery, EleveSuggestion},
    },
    routes::{client_ip, created},
    services::{
        audit::{self, AuditEntry},
        eleves::EleveService,
        export::{self, ExportFormat},
    },
    AppState,
};

pub async fn list_eleves(
    State(state): State<AppState>,
    Query(q): Query<EleveListQuery>,
) -> AppResult<Response> {
    if let Some(format) = ExportFormat::from_query(q.format.as_deref()) {
        let rows = EleveService::export_rows(&state.db, &q).await?;
        let file = export::render(format, &state.config.school_name, "Liste des élèves", "eleves", &rows)?;
        return Ok(file.into_response());
    }

    let page = parse_page(q.page.as_deref());
    Ok(Json(EleveService::list(&state.db, &q, page).await?).into_response())
}

/// GET /eleves/recherche?q= for autocomplete fields.
pub async fn search_eleves(
    State(state): State<AppState>,
    Query(q): Query<EleveSearchQuery>,
) -> AppResult<Json<Vec<EleveSuggestion>>> {
    Ok(Json(EleveService::search(&state.db, q.q.as_deref()).await?))
}

pub async fn get_eleve(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<EleveDetail>> {
    Ok(Json(EleveService::get(&state.db, id).await?))
}

pub async fn create_eleve(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<EleveForm>,
) -> AppResult<Response> {
    let eleve = EleveService::create(&state.db, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "eleve.create", "eleve", eleve.id)
            .details(format!("{} {} ({})", eleve.prenom, eleve.nom, eleve.numero_matricule))
            .ip(client_ip(&headers)),
    );
    Ok(created(format!("/eleves/{}", eleve.id), eleve))
}

pub async fn update_eleve(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<EleveForm>,
) -> AppResult<Json<Eleve>> {
    let eleve = EleveService::update(&state.db, id, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "eleve.update", "eleve", eleve.id)
            .ip(client_ip(&headers)),
    );
    Ok(Json(eleve))
}
