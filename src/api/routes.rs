//! API Routes
//!
//! Configures the Axum router with all sidecar endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, drop_queued_handler, health_handler, invalidate_handler, offline_handler,
    online_handler, queue_handler, read_handler, refresh_handler, stats_handler, sync_handler,
    warmup_handler, write_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: the UI process may call from any origin on loopback
/// - Tracing: logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ops/read", post(read_handler))
        .route("/ops/write", post(write_handler))
        .route("/ops/refresh", post(refresh_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/queue", get(queue_handler))
        .route("/queue/:id", delete(drop_queued_handler))
        .route("/sync", post(sync_handler))
        .route("/connectivity/online", post(online_handler))
        .route("/connectivity/offline", post(offline_handler))
        .route("/warmup", post(warmup_handler))
        .route("/cache", delete(clear_handler))
        .route("/cache/:prefix", delete(invalidate_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
