//! Error types for SmartLibrary server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    BadValue = 5,
    Conflict = 6,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Every violated field of a request, never only the first one
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for the outcomes callers are expected to handle (bad input,
    /// missing records, business rule violations).
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::NotFound(_) | AppError::Conflict(_)
        )
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
    /// Individual reasons for rejected requests
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, reasons) = match self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg, Vec::new())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg, Vec::new())
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg, Vec::new())
            }
            AppError::Validation(reasons) => (
                StatusCode::BAD_REQUEST,
                ErrorCode::BadValue,
                "Validation failed".to_string(),
                reasons,
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                    Vec::new(),
                )
            }
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorCode::Conflict,
                msg.clone(),
                vec![msg],
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                    Vec::new(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
            reasons,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_reason() {
        let err = AppError::Validation(vec![
            "user_id is required".to_string(),
            "due_date is required".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: user_id is required, due_date is required"
        );
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Validation(vec!["x".into()]), StatusCode::BAD_REQUEST),
            (AppError::Conflict("book unavailable".into()), StatusCode::CONFLICT),
            (AppError::NotFound("book".into()), StatusCode::NOT_FOUND),
            (AppError::Database(sqlx::Error::PoolTimedOut), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_storage_failures_are_not_business_errors() {
        assert!(AppError::Conflict("already returned".into()).is_business());
        assert!(!AppError::Database(sqlx::Error::PoolTimedOut).is_business());
    }
}
