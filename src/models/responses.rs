//! Response DTOs for the sidecar API

use serde::Serialize;
use serde_json::Value;

use crate::sync::{Connectivity, DeadLetter, SyncQueueItem};

/// Response body for `POST /ops/read` and `/ops/refresh`
#[derive(Debug, Clone, Serialize)]
pub struct ReadResponse {
    /// Cache key the result is stored under
    pub key: String,
    pub value: Value,
}

impl ReadResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for `GET /queue`
#[derive(Debug, Clone, Serialize)]
pub struct QueueResponse {
    pub pending: Vec<SyncQueueItem>,
    pub dead_letters: Vec<DeadLetter>,
    pub replay_in_progress: bool,
}

/// Response body for `DELETE /queue/:id`
#[derive(Debug, Clone, Serialize)]
pub struct DropResponse {
    pub message: String,
    pub id: String,
}

impl DropResponse {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            message: format!("Queued write '{}' dropped", id),
            id,
        }
    }
}

/// Response body for the connectivity endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityResponse {
    pub state: Connectivity,
    /// False when the service was already in `state`
    pub changed: bool,
}

/// Response body for `DELETE /cache/:prefix`
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub prefix: String,
    pub removed: usize,
}

/// Response body for `DELETE /cache`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn cleared() -> Self {
        Self {
            message: "Cache cleared".to_string(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    pub connectivity: Connectivity,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy(connectivity: Connectivity) -> Self {
        Self {
            status: "healthy".to_string(),
            connectivity,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
