//! Touch-Order Tracker
//!
//! Orders keys by their last update so the store can evict the least
//! recently updated entry first.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks update order with a monotonically increasing sequence number.
///
/// `order` maps sequence -> key (smallest = oldest), `positions` maps
/// key -> its current sequence so a touch can drop the stale slot.
#[derive(Debug, Default)]
pub struct LruTracker {
    order: BTreeMap<u64, String>,
    positions: HashMap<String, u64>,
    next_seq: u64,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as the most recently updated.
    pub fn touch(&mut self, key: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(old) = self.positions.insert(key.to_string(), seq) {
            self.order.remove(&old);
        }
        self.order.insert(seq, key.to_string());
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        if let Some(seq) = self.positions.remove(key) {
            self.order.remove(&seq);
        }
    }

    // == Evict Oldest ==
    /// Removes and returns the least recently updated key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.positions.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.positions.clear();
    }
}
