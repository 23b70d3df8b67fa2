//! API Module
//!
//! HTTP handlers and routing for the sidecar REST API.
//!
//! # Endpoints
//! - `POST /ops/read` - Cached read
//! - `POST /ops/write` - Write, queued while offline
//! - `POST /ops/refresh` - Read bypassing the cache
//! - `GET /stats` - Diagnostics
//! - `GET /health` - Health check
//! - `GET /queue`, `DELETE /queue/:id` - Pending writes and dead letters
//! - `POST /sync` - Manual replay pass
//! - `POST /connectivity/online`, `POST /connectivity/offline`
//! - `POST /warmup`
//! - `DELETE /cache`, `DELETE /cache/:prefix`

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
