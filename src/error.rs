//! Error types for the cache service
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

// == Remote Error ==
/// Failure reported by the remote operation boundary.
///
/// `retryable` separates transient conditions (network, lock contention,
/// timeout) from business-rule rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// Machine readable error code
    pub code: String,
    /// Whether the operation may succeed if attempted again
    #[serde(default)]
    pub retryable: bool,
    /// Human readable description
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    /// Creates an error that the retry policy will attempt again.
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: true,
            message: message.into(),
        }
    }

    /// Creates an error that is surfaced to the caller immediately.
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: false,
            message: message.into(),
        }
    }

    /// A remote call exceeded the caller's timeout.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::transient("TIMEOUT", format!("no response after {}ms", after.as_millis()))
    }

    /// The remote boundary could not be reached at all.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::transient("UNAVAILABLE", message)
    }
}

// == Persistence Error ==
/// Failures of the durable mirror. Logged, never returned to facade callers.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,
}

// == Cache Error Enum ==
/// Unified error type for the cache service.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Remote call kept failing with retryable errors until retries ran out
    #[error("Remote operation unavailable: {0}")]
    TransientRemote(RemoteError),

    /// Remote call rejected the operation
    #[error("Remote operation rejected: {0}")]
    PermanentRemote(RemoteError),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Queue item or resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RemoteError> for CacheError {
    fn from(err: RemoteError) -> Self {
        if err.retryable {
            CacheError::TransientRemote(err)
        } else {
            CacheError::PermanentRemote(err)
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::TransientRemote(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::PermanentRemote(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            CacheError::TransientRemote(err) | CacheError::PermanentRemote(err) => Json(json!({
                "error": self.to_string(),
                "code": err.code,
                "retryable": err.retryable,
            })),
            _ => Json(json!({ "error": self.to_string() })),
        };

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache service.
pub type Result<T> = std::result::Result<T, CacheError>;
