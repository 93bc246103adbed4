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
        admission::{AdmissionForm, AdmissionListQuery, DemandeAdmission},
        auth::AuthenticatedUser,
        StatusChangeRequest,
    },
    routes::{client_ip, created},
    services::{
        admissions::AdmissionService,
        audit::{self, AuditEntry},
        export::{self, ExportFormat},
    },
    AppState,
};

pub async fn list_admissions(
    State(state): State<AppState>,
    Query(q): Query<AdmissionListQuery>,
) -> AppResult<Response> {
    if let Some(format) = ExportFormat::from_query(q.format.as_deref()) {
        let rows = AdmissionService::export_rows(&state.db, &q).await?;
        let file = export::render(format, &state.config.school_name, "Demandes d'admission", "admissions", &rows)?;
        return Ok(file.into_response());
    }

    let page = parse_page(q.page.as_deref());
    Ok(Json(AdmissionService::list(&state.db, &q, page).await?).into_response())
}

pub async fn get_admission(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<DemandeAdmission>> {
    Ok(Json(AdmissionService::get(&state.db, id).await?))
}

pub async fn create_admission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<AdmissionForm>,
) -> AppResult<Response> {
    let demande = AdmissionService::create(&state.db, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "admission.create", "demande_admission", demande.id)
            .details(demande.numero_demande.clone())
            .ip(client_ip(&headers)),
    );
    Ok(created(format!("/admissions/{}", demande.id), demande))
}

pub async fn change_admission_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<StatusChangeRequest>,
) -> AppResult<Json<DemandeAdmission>> {
    let demande = AdmissionService::change_status(&state.db, id, &body.status).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "admission.status", "demande_admission", id)
            .details(format!("{} → {}", demande.numero_demande, demande.status))
            .ip(client_ip(&headers)),
    );
    Ok(Json(demande))
}

pub async fn enroll_admission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<Json<DemandeAdmission>> {
    let demande = AdmissionService::enroll(&state.db, id).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "admission.enroll", "demande_admission", id)
            .details(format!(
                "{} → élève #{}",
                demande.numero_demande,
                demande.eleve_id.unwrap_or_default()
            ))
            .ip(client_ip(&headers)),
    );
    Ok(Json(demande))
}
