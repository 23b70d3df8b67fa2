//! API Handlers
//!
//! HTTP request handlers for each sidecar endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::cache::cache_key;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, ConnectivityResponse, DropResponse, HealthResponse, InvalidateResponse,
    OperationRequest, QueueResponse, ReadResponse,
};
use crate::service::{CacheDiagnostics, CacheService, LoadReport, ReplayReport, WriteOutcome};
use crate::sync::Connectivity;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CacheService>,
}

impl AppState {
    pub fn new(service: Arc<CacheService>) -> Self {
        Self { service }
    }
}

fn validated(req: &OperationRequest) -> Result<()> {
    match req.validate() {
        Some(error_msg) => Err(CacheError::InvalidRequest(error_msg)),
        None => Ok(()),
    }
}

/// Handler for POST /ops/read
pub async fn read_handler(
    State(state): State<AppState>,
    Json(req): Json<OperationRequest>,
) -> Result<Json<ReadResponse>> {
    validated(&req)?;
    let key = cache_key(&req.category, &req.operation, &req.params);
    let value = state
        .service
        .read(&req.category, &req.operation, req.params)
        .await?;
    Ok(Json(ReadResponse::new(key, value)))
}

/// Handler for POST /ops/refresh
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<OperationRequest>,
) -> Result<Json<ReadResponse>> {
    validated(&req)?;
    let key = cache_key(&req.category, &req.operation, &req.params);
    let value = state
        .service
        .refresh(&req.category, &req.operation, req.params)
        .await?;
    Ok(Json(ReadResponse::new(key, value)))
}

/// Handler for POST /ops/write
///
/// 200 when the remote confirmed the write, 202 when it was queued.
pub async fn write_handler(
    State(state): State<AppState>,
    Json(req): Json<OperationRequest>,
) -> Result<(StatusCode, Json<WriteOutcome>)> {
    validated(&req)?;
    let outcome = state
        .service
        .write(&req.category, &req.operation, req.params)
        .await?;
    let status = match outcome {
        WriteOutcome::Applied { .. } => StatusCode::OK,
        WriteOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<CacheDiagnostics> {
    Json(state.service.diagnostics().await)
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.service.connectivity().state()))
}

/// Handler for GET /queue
pub async fn queue_handler(State(state): State<AppState>) -> Json<QueueResponse> {
    Json(QueueResponse {
        pending: state.service.pending_writes(),
        dead_letters: state.service.dead_letters(),
        replay_in_progress: state.service.queue().is_replaying(),
    })
}

/// Handler for DELETE /queue/:id
pub async fn drop_queued_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DropResponse>> {
    state.service.drop_queued(&id)?;
    Ok(Json(DropResponse::new(id)))
}

/// Handler for POST /sync
pub async fn sync_handler(State(state): State<AppState>) -> Json<ReplayReport> {
    Json(state.service.replay_queue().await)
}

/// Handler for POST /connectivity/online
///
/// The replay itself is started by the reconnect task.
pub async fn online_handler(State(state): State<AppState>) -> Json<ConnectivityResponse> {
    let changed = state.service.connectivity().mark_online();
    Json(ConnectivityResponse {
        state: Connectivity::Online,
        changed,
    })
}

/// Handler for POST /connectivity/offline
pub async fn offline_handler(State(state): State<AppState>) -> Json<ConnectivityResponse> {
    let changed = state.service.connectivity().mark_offline();
    Json(ConnectivityResponse {
        state: Connectivity::Offline,
        changed,
    })
}

/// Handler for POST /warmup
pub async fn warmup_handler(State(state): State<AppState>) -> Json<LoadReport> {
    Json(state.service.warm_up().await)
}

/// Handler for DELETE /cache
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.service.clear().await;
    Json(ClearResponse::cleared())
}

/// Handler for DELETE /cache/:prefix
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<InvalidateResponse>> {
    if prefix.is_empty() {
        return Err(CacheError::InvalidRequest("prefix cannot be empty".to_string()));
    }
    let removed = state.service.invalidate(&prefix).await;
    Ok(Json(InvalidateResponse { prefix, removed }))
}
