use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    db::filter::{parse_page, Page},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        finance::{DebiteurListQuery, FinanceSummary, FinanceSummaryQuery, PaiementForm, PaiementListItem, PaiementListQuery},
    },
    routes::client_ip,
    services::{
        audit::{self, AuditEntry},
        export::{self, ExportFormat},
        finance::FinanceService,
    },
    AppState,
};

pub async fn list_debiteurs(
    State(state): State<AppState>,
    Query(q): Query<DebiteurListQuery>,
) -> AppResult<Response> {
    if let Some(format) = ExportFormat::from_query(q.format.as_deref()) {
        let rows = FinanceService::debiteurs_export(&state.db, &q).await?;
        let file = export::render(format, &state.config.school_name, "Élèves débiteurs", "debiteurs", &rows)?;
        return Ok(file.into_response());
    }

    let page = parse_page(q.page.as_deref());
    Ok(Json(FinanceService::debiteurs(&state.db, &q, page).await?).into_response())
}

pub async fn summary(
    State(state): State<AppState>,
    Query(q): Query<FinanceSummaryQuery>,
) -> AppResult<Json<FinanceSummary>> {
    Ok(Json(FinanceService::summary(&state.db, q.annee_scolaire_id.as_deref()).await?))
}

pub async fn list_paiements(
    State(state): State<AppState>,
    Query(q): Query<PaiementListQuery>,
) -> AppResult<Json<Page<PaiementListItem>>> {
    let page = parse_page(q.page.as_deref());
    Ok(Json(FinanceService::paiements(&state.db, &q, page).await?))
}

pub async fn record_paiement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<PaiementForm>,
) -> AppResult<(StatusCode, Json<PaiementListItem>)> {
    let paiement = FinanceService::record_paiement(&state.db, &body).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(user.user_id, "paiement.create", "paiement", paiement.id)
            .details(format!(
                "{} : {} {} ({})",
                paiement.eleve_nom, paiement.montant, paiement.type_frais, paiement.mode_paiement
            ))
            .ip(client_ip(&headers)),
    );
    Ok((StatusCode::CREATED, Json(paiement)))
}
