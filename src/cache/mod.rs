//! Cache Module
//!
//! In-memory result cache with per-operation TTL, write-triggered
//! invalidation and eviction of the least recently updated entries.

mod clock;
mod entry;
pub mod key;
mod lru;
mod policy;
mod stats;
mod store;


// Re-export public types
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use key::{cache_key, operation_key};
pub use lru::LruTracker;
pub use policy::{InvalidationRouter, PolicyFile, TtlPolicy, DEFAULT_TTL};
pub use stats::CacheStats;
pub use store::CacheStore;
