//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with touch-order tracking,
//! per-operation TTL validity and a durable mirror.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::key::operation_of;
use crate::cache::{CacheEntry, CacheStats, Clock, LruTracker, SystemClock, TtlPolicy};
use crate::persist::Mirror;

// == Cache Store ==
/// Bounded key -> value map whose entries expire by operation TTL.
#[derive(Debug)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Update-order tracker for eviction
    lru: LruTracker,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// Validity per operation
    policy: TtlPolicy,
    clock: Arc<dyn Clock>,
    mirror: Mirror,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a memory-only store on the system clock.
    ///
    /// A `max_entries` of zero is treated as one so a fresh insert always fits.
    pub fn new(max_entries: usize, policy: TtlPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            policy,
            clock: Arc::new(SystemClock),
            mirror: Mirror::disabled(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = mirror;
        self
    }

    // == Hydrate ==
    /// Loads persisted entries, dropping those whose TTL already elapsed.
    ///
    /// Returns the number of entries now live.
    pub fn hydrate(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut loaded = self.mirror.load();
        // Oldest first so touch order mirrors insertion order
        loaded.sort_by_key(|(_, _, inserted_at)| *inserted_at);

        let mut expired = 0;
        for (key, value, inserted_at) in loaded {
            let entry = CacheEntry::new(value, inserted_at);
            if entry.is_valid(now, self.ttl_for_key(&key)) {
                self.lru.touch(&key);
                self.entries.insert(key, entry);
            } else {
                self.mirror.delete(&key);
                expired += 1;
            }
        }

        while self.entries.len() > self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }

        self.stats.set_total_entries(self.entries.len());
        info!(
            loaded = self.entries.len(),
            expired, "Hydrated cache from persistent storage"
        );
        self.entries.len()
    }

    // == Get ==
    /// Returns the value for `key` if present and still valid.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        let ttl = self.ttl_for_key(key);

        match self.entries.get(key) {
            Some(entry) if entry.is_valid(now, ttl) => {
                self.stats.record_hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!(key, "Cache entry expired");
                self.remove(key);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Like [`get`](Self::get) but leaves statistics and storage untouched.
    pub fn peek(&self, key: &str) -> Option<&Value> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .filter(|entry| entry.is_valid(now, self.ttl_for_key(key)))
            .map(|entry| &entry.value)
    }

    // == Set ==
    /// Stores `value` under `key`, fully replacing any previous value.
    ///
    /// The entry becomes the most recently updated; if the store is over
    /// capacity afterwards, the least recently updated entries are evicted.
    pub fn set(&mut self, key: String, value: Value) {
        let now = self.clock.now_ms();
        self.mirror.save(&key, &value, now);
        self.lru.touch(&key);
        self.entries.insert(key, CacheEntry::new(value, now));

        while self.entries.len() > self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }

        self.stats.set_total_entries(self.entries.len());
    }

    // == Invalidate ==
    /// Removes every entry whose key starts with `prefix`.
    pub fn invalidate(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &doomed {
            self.entries.remove(key);
            self.lru.remove(key);
        }
        self.mirror.delete_prefix(prefix);

        self.stats.record_invalidations(doomed.len());
        self.stats.set_total_entries(self.entries.len());
        doomed.len()
    }

    /// Removes a single key. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let existed = self.entries.remove(key).is_some();
        self.lru.remove(key);
        self.mirror.delete(key);
        self.stats.set_total_entries(self.entries.len());
        existed
    }

    // == Clear ==
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.mirror.clear();
        self.stats.record_invalidations(count);
        self.stats.set_total_entries(0);
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_valid(now, self.ttl_for_key(key)))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove(key);
        }

        self.stats.record_expirations(expired_keys.len());
        expired_keys.len()
    }

    // == Introspection ==
    /// Keys of valid entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| entry.is_valid(now, self.ttl_for_key(key)))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn ttl_for_key(&self, key: &str) -> Duration {
        self.policy.ttl_for(operation_of(key))
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn persistence_active(&self) -> bool {
        self.mirror.is_active()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) -> bool {
        match self.lru.evict_oldest() {
            Some(key) => {
                debug!(key = %key, "Evicting least recently updated entry");
                self.entries.remove(&key);
                self.mirror.delete(&key);
                self.stats.record_eviction();
                true
            }
            None => false,
        }
    }
}
