use axum::{extract::State, http::HeaderMap, Json};

use crate::{
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        user::{LoginRequest, LoginResponse, UserProfile},
    },
    routes::client_ip,
    services::{
        audit::{self, AuditEntry},
        auth::AuthService,
    },
    AppState,
};

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let response = AuthService::login(
        &state.db,
        &body.email,
        &body.password,
        &state.config.jwt_secret,
        state.config.jwt_expiry_seconds,
    )
    .await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new(response.user.id, "auth.login", "utilisateur", response.user.id)
            .ip(client_ip(&headers)),
    );
    Ok(Json(response))
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<UserProfile>> {
    Ok(Json(AuthService::profile(&state.db, user.user_id).await?))
}
