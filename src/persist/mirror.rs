//! Fire-and-forget mirror of cache writes into a persistent backend.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{NoopBackend, PayloadCodec, PersistedEntry, PersistentBackend};

/// Encodes values for the backend and swallows backend failures.
///
/// Every method logs a warning on error and returns normally; callers never
/// observe persistence problems.
#[derive(Clone)]
pub struct Mirror {
    backend: Arc<dyn PersistentBackend>,
    codec: Option<Arc<dyn PayloadCodec>>,
}

impl Mirror {
    pub fn new(backend: Arc<dyn PersistentBackend>, codec: Option<Arc<dyn PayloadCodec>>) -> Self {
        Self { backend, codec }
    }

    /// A mirror that stores nothing.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopBackend), None)
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_durable()
    }

    // == Save ==
    pub fn save(&self, key: &str, value: &Value, inserted_at: u64) {
        if !self.is_active() {
            return;
        }

        let raw = match serde_json::to_vec(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Could not serialize cache value for persistence");
                return;
            }
        };

        let (payload, compressed) = match &self.codec {
            Some(codec) => match codec.compress(&raw) {
                Ok(packed) => (packed, true),
                Err(e) => {
                    warn!(key, codec = codec.name(), error = %e, "Compression failed, storing uncompressed");
                    (raw, false)
                }
            },
            None => (raw, false),
        };

        let entry = PersistedEntry {
            key: key.to_string(),
            payload,
            compressed,
            inserted_at,
        };
        if let Err(e) = self.backend.save(&entry) {
            warn!(key, error = %e, "Failed to persist cache entry");
        }
    }

    pub fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key) {
            warn!(key, error = %e, "Failed to delete persisted cache entry");
        }
    }

    pub fn delete_prefix(&self, prefix: &str) {
        match self.backend.delete_prefix(prefix) {
            Ok(n) => debug!(prefix, removed = n, "Purged persisted entries"),
            Err(e) => warn!(prefix, error = %e, "Failed to purge persisted entries"),
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.backend.clear() {
            warn!(error = %e, "Failed to clear persisted cache");
        }
    }

    // == Load ==
    /// Decodes every stored entry as `(key, value, inserted_at)`.
    ///
    /// Entries that cannot be decoded are deleted and skipped.
    pub fn load(&self) -> Vec<(String, Value, u64)> {
        let stored = match self.backend.load_all() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted cache, starting empty");
                return Vec::new();
            }
        };

        let mut loaded = Vec::with_capacity(stored.len());
        for entry in stored {
            match self.decode(&entry) {
                Some(value) => loaded.push((entry.key, value, entry.inserted_at)),
                None => self.delete(&entry.key),
            }
        }
        loaded
    }

    fn decode(&self, entry: &PersistedEntry) -> Option<Value> {
        let raw = if entry.compressed {
            let Some(codec) = &self.codec else {
                warn!(key = %entry.key, "Compressed entry found but no codec configured");
                return None;
            };
            match codec.decompress(&entry.payload) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Failed to decompress persisted entry");
                    return None;
                }
            }
        } else {
            entry.payload.clone()
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Failed to decode persisted entry");
                None
            }
        }
    }
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("active", &self.is_active())
            .field("codec", &self.codec.as_ref().map(|c| c.name()))
            .finish()
    }
}
