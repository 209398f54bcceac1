//! Error types for the Noor portal core
//!
//! All errors use thiserror for structured error handling.
//! None of them is fatal: every variant maps to a degraded state
//! (login prompt, no-op, transient notice or in-memory storage).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote action attempted without a valid session
    #[error("Not signed in")]
    Unauthenticated,

    /// A collaborator is missing its API key or endpoint
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Network or service failure worth surfacing as a transient notice
    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    /// The request never reached the service
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    #[error("Rate limited by remote service")]
    RateLimited,

    /// Non-retryable response from a remote service
    #[error("Remote service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Whether a retry of the same request could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_) | AppError::Unreachable(_) | AppError::RateLimited
        )
    }

    /// Whether the service certainly did not act on the request
    pub fn is_unsent(&self) -> bool {
        matches!(self, AppError::Unreachable(_) | AppError::RateLimited)
    }

    /// Map a non-success HTTP status to an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => AppError::Unauthenticated,
            429 => AppError::RateLimited,
            500..=599 => AppError::Transient(format!("{}: {}", status, message)),
            _ => AppError::Remote { status, message },
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            return AppError::Unreachable(e.to_string());
        }
        if e.is_timeout() || e.is_request() {
            return AppError::Transient(e.to_string());
        }
        match e.status() {
            Some(status) => AppError::from_status(status.as_u16(), e.to_string()),
            None if e.is_decode() || e.is_body() => AppError::Generic(e.to_string()),
            None => AppError::Transient(e.to_string()),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) | AppError::InvalidKey(_) | AppError::Attachment(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) | AppError::Remote { status: 404, .. } => StatusCode::NOT_FOUND,
            AppError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Upstream trouble, including payloads we could not read
            AppError::Transient(_)
            | AppError::Unreachable(_)
            | AppError::RateLimited
            | AppError::Remote { .. }
            | AppError::Serialization(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::warn!("Request failed with {}: {}", status, self);
        }

        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
