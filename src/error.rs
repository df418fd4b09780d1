//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::TokenError;
use crate::db::StoreError;
use crate::domain::{DeadlineExceeded, DomainError};
use crate::policy::PolicyError;
use crate::tasks::TaskError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// A single failed validation rule on a request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Request validation failed")]
    Validation(Vec<FieldViolation>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Retryable / dependency errors
    #[error("Transient store conflict: {0}")]
    TransientStoreConflict(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Check if the whole operation may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientStoreConflict(_))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("record not found".to_string()),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Transient(msg) => AppError::TransientStoreConflict(msg),
            StoreError::Domain(e) => AppError::Domain(e),
            StoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<DeadlineExceeded> for AppError {
    fn from(_: DeadlineExceeded) -> Self {
        AppError::DeadlineExceeded
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(msg) | TokenError::KeyTooShort(msg) => AppError::Internal(msg),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

impl From<PolicyError> for AppError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::InvalidRequest(msg) => AppError::InvalidArgument(msg),
            PolicyError::Store(e) => AppError::from(e),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        AppError::Dependency(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut violations = Vec::new();
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_argument", Some(msg.clone()))
            }
            AppError::Validation(list) => {
                violations = list.clone();
                (StatusCode::BAD_REQUEST, "validation_failed", None)
            }

            // 401 Unauthorized
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", Some(msg.clone()))
            }

            // 403 Forbidden
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),

            // 404 Not Found
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", Some(what.clone())),

            // 409 Conflict
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(ref domain_err) => match domain_err {
                DomainError::InsufficientFunds { .. } => (
                    StatusCode::BAD_REQUEST,
                    "insufficient_funds",
                    Some(domain_err.to_string()),
                ),
                DomainError::InvalidArgument(msg) | DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_argument", Some(msg.clone()))
                }
                DomainError::SameAccountTransfer => {
                    (StatusCode::BAD_REQUEST, "same_account_transfer", None)
                }
                DomainError::CurrencyMismatch { .. } => (
                    StatusCode::BAD_REQUEST,
                    "currency_mismatch",
                    Some(domain_err.to_string()),
                ),
                DomainError::AccountNotFound(id) => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(id.to_string()))
                }
                DomainError::UserNotFound(name) => {
                    (StatusCode::NOT_FOUND, "user_not_found", Some(name.clone()))
                }
            },

            // 503 / 504: caller may retry later
            AppError::TransientStoreConflict(msg) => {
                tracing::warn!("Transient store conflict surfaced to client: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "transient_conflict", None)
            }
            AppError::Dependency(msg) => {
                tracing::error!("Dependency unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", None)
            }
            AppError::DeadlineExceeded => {
                (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", None)
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
            violations,
        };

        (status, Json(body)).into_response()
    }
}
