use serde::{Deserialize, Serialize};

use super::user::Role;

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // utilisateur id
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// Extracted from the validated JWT and stored in request extensions by the
/// permission guard.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}
