/// Unified error types for Gatehouse
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum GateError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No verified identity on the request
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authenticated but lacking the required status
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Would violate an invariant (e.g., duplicate user for an identity)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            GateError::Authentication(_) | GateError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "Unauthenticated",
                self.to_string(),
            ),
            GateError::Authorization(_) => (StatusCode::FORBIDDEN, "Forbidden", self.to_string()),
            GateError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            GateError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            GateError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            GateError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            GateError::Database(_) | GateError::Internal(_) | GateError::Io(_) => {
                tracing::error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for Gatehouse operations
pub type GateResult<T> = Result<T, GateError>;

/// True when a database error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
