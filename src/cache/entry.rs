//! Cache Entry Module
//!
//! Defines the structure for individual cache entries. Entries do not carry
//! their own TTL; validity is decided against the policy table at read time.

use std::time::Duration;

use serde_json::Value;

// == Cache Entry ==
/// A cached remote result and the time it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Opaque remote result
    pub value: Value,
    /// Insertion timestamp (Unix milliseconds)
    pub inserted_at: u64,
}

impl CacheEntry {
    pub fn new(value: Value, inserted_at: u64) -> Self {
        Self { value, inserted_at }
    }

    // == Validity ==
    /// An entry is valid while `now - inserted_at < ttl`.
    ///
    /// Boundary condition: once the full TTL has elapsed the entry is stale.
    /// Timestamps from the future (clock moved backwards) count as age zero.
    pub fn is_valid(&self, now_ms: u64, ttl: Duration) -> bool {
        self.age_ms(now_ms) < ttl.as_millis() as u64
    }

    /// Milliseconds since insertion.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.inserted_at)
    }
}
