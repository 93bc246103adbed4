use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    db::filter::parse_page,
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        classe::{Classe, ClasseDetail, ClasseForm, ClasseListQuery},
    },
    routes::{client_ip, created},
    services::{
        audit::{self, AuditEntry},
        classes::ClasseService,
        export::{self, ExportFormat},
    },
    AppState,
};

pub async fn list_classes(
    State(state): State<AppState>,
    Query(q): Query<ClasseListQuery>,
) -> AppResult<Response> {
    if let Some(format) = ExportFormat::from_query(q.format.as_deref()) {
        let rows = ClasseService::export_rows(&state.db, &q).await?;
        let file = export::render(format, &state.config.school_name, "Liste des classes", "classes", &rows)?;
        return Ok(file.into_response());
    }

    let page = parse_page(q.page.as_deref());
    Ok(Json(ClasseService::list(&state.db, &q, page).await?).into_response())
}

pub async fn get_classe(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<ClasseDetail>> {
    Ok(Json(ClasseService::get(&state.db, id).await?))
}

pub async fn create_classe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<ClasseForm>,
) -> AppResult<Response> {
    let classe = ClasseService::create(&state.db, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "classe.create", "classe", classe.id)
            .details(classe.nom.clone())
            .ip(client_ip(&headers)),
    );
    Ok(created(format!("/classes/{}", classe.id), classe))
}

pub async fn update_classe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ClasseForm>,
) -> AppResult<Json<Classe>> {
    let classe = ClasseService::update(&state.db, id, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "classe.update", "classe", classe.id)
            .details(classe.nom.clone())
            .ip(client_ip(&headers)),
    );
    Ok(Json(classe))
}

pub async fn delete_classe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let classe = ClasseService::delete(&state.db, id).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "classe.delete", "classe", classe.id)
            .details(classe.nom)
            .ip(client_ip(&headers)),
    );
    Ok(StatusCode::NO_CONTENT)
}
