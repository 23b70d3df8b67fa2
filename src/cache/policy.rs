//! Policy Tables
//!
//! Table-driven TTL lookup and write-to-read invalidation routing. Both
//! tables are keyed by `category.operation`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Validity used when an operation has no explicit TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

// == TTL Policy ==
/// Maps an operation key to how long its results stay valid.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    durations: HashMap<String, Duration>,
    default_ttl: Duration,
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            durations: HashMap::new(),
            default_ttl,
        }
    }

    /// Builder-style registration of an explicit TTL.
    pub fn with(mut self, operation_key: impl Into<String>, ttl: Duration) -> Self {
        self.durations.insert(operation_key.into(), ttl);
        self
    }

    pub fn insert(&mut self, operation_key: impl Into<String>, ttl: Duration) {
        self.durations.insert(operation_key.into(), ttl);
    }

    /// Returns the configured duration or the default.
    pub fn ttl_for(&self, operation_key: &str) -> Duration {
        self.durations
            .get(operation_key)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// TTLs for the record-management read operations.
    pub fn records_default(default_ttl: Duration) -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self::new(default_ttl)
            .with("equipment.getAll", minutes(10))
            .with("equipment.getById", minutes(10))
            .with("equipment.getByLocation", minutes(10))
            .with("inspections.getAll", minutes(5))
            .with("inspections.getUpcoming", minutes(2))
            .with("inspections.getOverdue", minutes(2))
            .with("workOrders.getAll", minutes(5))
            .with("workOrders.getOpen", minutes(2))
            .with("compliance.getDocuments", minutes(30))
            .with("dashboard.getStats", minutes(1))
            .with("settings.get", minutes(60))
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

// == Invalidation Router ==
/// Maps a write operation key to the read-key prefixes it makes stale.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRouter {
    rules: HashMap<String, Vec<String>>,
}

impl InvalidationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, write_key: impl Into<String>, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(write_key, prefixes);
        self
    }

    pub fn insert<I, S>(&mut self, write_key: impl Into<String>, prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .insert(write_key.into(), prefixes.into_iter().map(Into::into).collect());
    }

    /// Prefixes to purge after `write_key` is confirmed.
    ///
    /// A write without a rule still invalidates its own key.
    pub fn rules_for(&self, write_key: &str) -> Vec<String> {
        match self.rules.get(write_key) {
            Some(prefixes) => prefixes.clone(),
            None => vec![write_key.to_string()],
        }
    }

    /// Invalidation rules for the record-management write operations.
    pub fn records_default() -> Self {
        let equipment_reads = ["equipment.", "dashboard.getStats"];
        let inspection_reads = ["inspections.", "equipment.getById", "dashboard.getStats"];
        let work_order_reads = ["workOrders.", "dashboard.getStats"];

        Self::new()
            .with("equipment.create", equipment_reads)
            .with("equipment.update", equipment_reads)
            .with("equipment.delete", equipment_reads.into_iter().chain(["inspections.", "workOrders."]))
            .with("inspections.create", inspection_reads)
            .with("inspections.update", inspection_reads)
            .with("inspections.complete", inspection_reads)
            .with("inspections.delete", inspection_reads)
            .with("workOrders.create", work_order_reads)
            .with("workOrders.update", work_order_reads)
            .with("workOrders.close", work_order_reads)
            .with("workOrders.delete", work_order_reads)
            .with("compliance.upload", ["compliance."])
            .with("compliance.delete", ["compliance."])
            .with("settings.update", ["settings."])
    }
}

// == Policy File ==
/// Optional JSON overrides for the built-in tables.
///
/// ```json
/// {
///   "ttl_seconds": { "equipment.getAll": 600 },
///   "invalidation": { "equipment.create": ["equipment.", "dashboard.getStats"] },
///   "warmup": ["equipment.getAll"],
///   "critical": ["dashboard.getStats"]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyFile {
    pub ttl_seconds: HashMap<String, u64>,
    pub invalidation: HashMap<String, Vec<String>>,
    pub warmup: Option<Vec<String>>,
    pub critical: Option<Vec<String>>,
}

impl PolicyFile {
    /// Layers the file's entries over existing tables.
    pub fn apply(&self, ttl: &mut TtlPolicy, router: &mut InvalidationRouter) {
        for (key, secs) in &self.ttl_seconds {
            ttl.insert(key.clone(), Duration::from_secs(*secs));
        }
        for (key, prefixes) in &self.invalidation {
            router.insert(key.clone(), prefixes.iter().cloned());
        }
    }
}
