//! Offline Cache - result cache and offline write synchronizer
//!
//! Sits between a record-management UI and its remote data boundary:
//! per-operation TTL caching, write-triggered invalidation, durable
//! persistence across restarts, and a sync queue that replays writes made
//! while offline.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod persist;
pub mod remote;
pub mod retry;
pub mod service;
pub mod sync;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use error::{CacheError, RemoteError};
pub use remote::{HttpRemote, RemoteOperation, RemoteRequest};
pub use service::{CacheDiagnostics, CacheService, ServiceBuilder, WriteOutcome};
pub use sync::{Connectivity, SyncEvent};
