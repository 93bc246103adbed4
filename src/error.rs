use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Blocking form problems, rendered together as a list.
    #[error("{}", .0.join(" "))]
    Validation(Vec<String>),

    #[error("{0}")]
    NotFound(String),

    #[error("Authentification requise")]
    Unauthorized,

    #[error("Identifiants invalides")]
    InvalidCredentials,

    #[error("Accès refusé")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(vec![message.into()])
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Messages shown to the user. Infrastructure details stay in the logs.
    pub fn messages(&self) -> Vec<String> {
        match self {
            AppError::Validation(errors) => errors.clone(),
            AppError::Database(_) | AppError::Internal(_) => {
                vec!["Une erreur est survenue lors de l'accès aux données.".to_string()]
            }
            other => vec![other.to_string()],
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Database(e) = &self {
            tracing::error!("database error: {e}");
        }
        if let AppError::Internal(e) = &self {
            tracing::error!("internal error: {e:#}");
        }
        let status = self.status();
        (status, Json(json!({ "errors": self.messages() }))).into_response()
    }
}

/// Accumulates proactive form checks so they are reported together.
#[derive(Debug, Default)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.push(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_error(self) -> AppError {
        AppError::Validation(self.0)
    }

    pub fn into_result(self) -> AppResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.0))
        }
    }
}

/// Unique-constraint violations bubble up as this so callers can retry or report.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_collected_in_order() {
        let mut errors = ValidationErrors::new();
        errors.check(true, "jamais");
        errors.check(false, "Le nom est obligatoire.");
        errors.push("Le niveau est invalide.");

        match errors.into_result() {
            Err(AppError::Validation(list)) => assert_eq!(
                list,
                vec!["Le nom est obligatoire.".to_string(), "Le niveau est invalide.".to_string()]
            ),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_validation_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn database_errors_hide_details() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.messages().len(), 1);
        assert!(!err.messages()[0].contains("RowNotFound"));
    }
}
