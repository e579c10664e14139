/// Unified error types for Heartline
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the matching and realtime engine
#[derive(Error, Debug)]
pub enum AppError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Acting on a pair or record the caller is not a party to
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Account is banned or otherwise restricted
    #[error("Account restricted: {0}")]
    AccountRestricted(String),

    /// Daily swipe limit reached
    #[error("Daily swipe limit of {limit} reached")]
    QuotaExceeded { limit: i64 },

    /// Swipe aimed at an impossible target (e.g. yourself)
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// State machine action against the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl AppError {
    /// Machine-readable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::Io(_) => {
                "InternalServerError"
            }
            AppError::Authentication(_) => "AuthenticationRequired",
            AppError::Forbidden(_) => "Forbidden",
            AppError::AccountRestricted(_) => "AccountRestricted",
            AppError::QuotaExceeded { .. } => "QuotaExceeded",
            AppError::InvalidTarget(_) => "InvalidTarget",
            AppError::InvalidState(_) => "InvalidState",
            AppError::Validation(_) => "InvalidRequest",
            AppError::RateLimitExceeded { .. } => "RateLimitExceeded",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::AccountRestricted(_) => StatusCode::FORBIDDEN,
            AppError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            AppError::InvalidTarget(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Internal(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string() // Don't leak details
            }
            AppError::Internal(_) | AppError::Io(_) => {
                tracing::error!("{}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        crate::metrics::record_error(self.code());

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for Heartline operations
pub type AppResult<T> = Result<T, AppError>;
