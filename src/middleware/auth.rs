use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::error::AppError;
use crate::models::auth::{AuthenticatedUser, Claims};

/// Handlers receive the user the permission guard authenticated.
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// Read and validate the bearer token of a request.
pub fn authenticate(headers: &HeaderMap, secret: &str) -> Result<AuthenticatedUser, AppError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    decode_access_token(token, secret).map_err(|_| AppError::Unauthorized)
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<AuthenticatedUser, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
        role: claims.role,
    })
}
