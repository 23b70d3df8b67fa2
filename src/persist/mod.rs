//! Persistent Backend Module
//!
//! Durable key-value storage mirroring the in-memory cache and holding the
//! sync queue across restarts. Persistence is an optimization: every failure
//! here is logged and the service keeps running from memory.

mod codec;
mod memory;
mod mirror;
mod sqlite;

use crate::error::PersistenceError;
use crate::sync::SyncQueueItem;

pub use codec::{GzipCodec, PayloadCodec};
pub use memory::{MemoryBackend, NoopBackend};
pub use mirror::Mirror;
pub use sqlite::SqliteBackend;

/// Result type for backend calls.
pub type PersistResult<T> = std::result::Result<T, PersistenceError>;

// == Persisted Entry ==
/// A cache entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntry {
    pub key: String,
    /// Serialized value, possibly compressed
    pub payload: Vec<u8>,
    pub compressed: bool,
    /// Unix milliseconds
    pub inserted_at: u64,
}

/// Durable mirror of the cache store.
pub trait PersistentBackend: Send + Sync {
    fn load_all(&self) -> PersistResult<Vec<PersistedEntry>>;

    /// Inserts or replaces the entry for `entry.key`.
    fn save(&self, entry: &PersistedEntry) -> PersistResult<()>;

    fn delete(&self, key: &str) -> PersistResult<()>;

    /// Deletes every key starting with `prefix`, returning how many went.
    fn delete_prefix(&self, prefix: &str) -> PersistResult<usize>;

    fn clear(&self) -> PersistResult<()>;

    /// False for backends that do not actually survive a restart.
    fn is_durable(&self) -> bool {
        true
    }
}

/// Durable storage for pending writes.
pub trait QueueBackend: Send + Sync {
    /// Items in enqueue order.
    fn load_queue(&self) -> PersistResult<Vec<SyncQueueItem>>;

    fn push(&self, item: &SyncQueueItem) -> PersistResult<()>;

    /// Rewrites the attempt bookkeeping of an existing item.
    fn update(&self, item: &SyncQueueItem) -> PersistResult<()>;

    fn remove(&self, id: &str) -> PersistResult<()>;
}
