use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::Claims,
        user::{LoginResponse, Role, UserProfile, Utilisateur},
    },
    services::metrics::LOGINS_COUNTER,
};

const USER_COLUMNS: &str = "id, email, password_hash, nom, prenom, role, actif, created_at";

pub struct AuthService;

impl AuthService {
    /// Check credentials and issue an access token. Unknown emails, wrong
    /// passwords and deactivated accounts all answer the same way.
    pub async fn login(
        pool: &PgPool,
        email: &str,
        password: &str,
        jwt_secret: &str,
        ttl_seconds: u64,
    ) -> AppResult<LoginResponse> {
        let user = sqlx::query_as::<_, Utilisateur>(&format!(
            "SELECT {USER_COLUMNS} FROM utilisateurs WHERE lower(email) = lower($1) AND actif = TRUE"
        ))
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

        let Some(user) = user else {
            LOGINS_COUNTER.with_label_values(&["failure"]).inc();
            return Err(AppError::InvalidCredentials);
        };

        let valid = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
        if !valid {
            LOGINS_COUNTER.with_label_values(&["failure"]).inc();
            return Err(AppError::InvalidCredentials);
        }

        let profile = UserProfile::try_from(user)?;
        let access_token = Self::generate_access_token(profile.id, profile.role, jwt_secret, ttl_seconds)?;
        LOGINS_COUNTER.with_label_values(&["success"]).inc();

        Ok(LoginResponse {
            access_token,
            user: profile,
        })
    }

    pub async fn profile(pool: &PgPool, user_id: i64) -> AppResult<UserProfile> {
        let user = sqlx::query_as::<_, Utilisateur>(&format!(
            "SELECT {USER_COLUMNS} FROM utilisateurs WHERE id = $1 AND actif = TRUE"
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::Unauthorized)?;
        Ok(UserProfile::try_from(user)?)
    }

    pub fn generate_access_token(
        user_id: i64,
        role: Role,
        secret: &str,
        ttl_seconds: u64,
    ) -> anyhow::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now,
            exp: now + ttl_seconds as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::decode_access_token;

    #[test]
    fn issued_token_decodes_to_same_user() {
        let token = AuthService::generate_access_token(42, Role::Comptable, "secret-de-test", 3600).unwrap();
        let user = decode_access_token(&token, "secret-de-test").unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.role, Role::Comptable);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = AuthService::generate_access_token(1, Role::Admin, "un", 3600).unwrap();
        assert!(decode_access_token(&token, "deux").is_err());
    }
}
