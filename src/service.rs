//! Cached Operation Facade
//!
//! The single entry point callers use. Reads go through the cache store and,
//! on a miss, through the retry executor to the remote. Writes go to the
//! remote when online, or into the sync queue when offline; a confirmed write
//! applies its invalidation rule exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{
    cache_key, CacheStore, Clock, InvalidationRouter, SystemClock, TtlPolicy, DEFAULT_TTL,
};
use crate::error::{CacheError, RemoteError, Result};
use crate::persist::{
    Mirror, NoopBackend, PayloadCodec, PersistentBackend, QueueBackend,
};
use crate::remote::{RemoteOperation, RemoteRequest};
use crate::retry::{RetryExecutor, RetryOptions, WriteConfirmation};
use crate::sync::{
    Connectivity, ConnectivityMonitor, DeadLetter, SyncEvent, SyncQueue, SyncQueueItem,
};
use crate::tasks::{self, BackgroundTasks};

/// Reads populated at start-up when no list is configured.
pub const DEFAULT_WARMUP: &[&str] = &[
    "equipment.getAll",
    "inspections.getUpcoming",
    "inspections.getOverdue",
    "workOrders.getOpen",
    "dashboard.getStats",
];

/// Reads refreshed on a timer when no list is configured.
pub const DEFAULT_CRITICAL: &[&str] = &["dashboard.getStats", "inspections.getOverdue"];

/// Reason recorded for items removed through [`CacheService::drop_queued`].
const OPERATOR_DROP_REASON: &str = "dropped by operator";

// == Outcomes ==
/// Result of [`CacheService::write`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WriteOutcome {
    /// The remote confirmed the write
    Applied { value: Value },
    /// The write waits in the sync queue; watch [`SyncEvent`]s for its id
    Queued { id: String },
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub dropped: usize,
    /// Items left queued after a transient failure
    pub failed: usize,
    /// True when another pass was already running
    pub skipped: bool,
}

/// Summary of a warm-up or critical refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: usize,
}

/// Point-in-time view of the service.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDiagnostics {
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub keys: Vec<String>,
    pub queue_depth: usize,
    pub replay_in_progress: bool,
    pub persistence_active: bool,
    pub connectivity: Connectivity,
    pub dead_letters: usize,
}

// == Cache Service ==
pub struct CacheService {
    store: Mutex<CacheStore>,
    remote: Arc<dyn RemoteOperation>,
    executor: RetryExecutor,
    router: InvalidationRouter,
    queue: Arc<SyncQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    /// Per-key locks so concurrent misses share one fetch
    inflight: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    replay_requested: AtomicBool,
    clock: Arc<dyn Clock>,
    warmup: Vec<String>,
    critical: Vec<String>,
    cleanup_interval: Duration,
    refresh_interval: Duration,
    tasks: StdMutex<Option<BackgroundTasks>>,
}

impl CacheService {
    pub fn builder(remote: Arc<dyn RemoteOperation>) -> ServiceBuilder {
        ServiceBuilder::new(remote)
    }

    // == Read ==
    /// Returns the cached result for the call or fetches it from the remote.
    pub async fn read(&self, category: &str, operation: &str, params: Value) -> Result<Value> {
        let key = cache_key(category, operation, &params);

        if let Some(value) = self.store.lock().await.get(&key) {
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        let flight = self.flight(&key);
        let _turn = flight.lock.lock().await;
        self.read_through(&key, RemoteRequest::new(category, operation, params))
            .await
    }

    async fn read_through(&self, key: &str, request: RemoteRequest) -> Result<Value> {
        // A concurrent caller may have filled the entry while we waited
        if let Some(value) = self.store.lock().await.peek(key).cloned() {
            debug!(key, "Filled by concurrent fetch");
            return Ok(value);
        }

        debug!(key, "Cache miss, fetching");
        let value = self.fetch(&request).await?;
        self.store.lock().await.set(key.to_string(), value.clone());
        Ok(value)
    }

    /// Fetches fresh data regardless of what is cached, then caches it.
    pub async fn refresh(&self, category: &str, operation: &str, params: Value) -> Result<Value> {
        let key = cache_key(category, operation, &params);
        let value = self
            .fetch(&RemoteRequest::new(category, operation, params))
            .await?;
        self.store.lock().await.set(key, value.clone());
        Ok(value)
    }

    async fn fetch(&self, request: &RemoteRequest) -> std::result::Result<Value, RemoteError> {
        let remote = &self.remote;
        self.executor
            .execute(move || async move { remote.execute(request).await })
            .await
    }

    // == Write ==
    /// Performs a write, or queues it while offline.
    ///
    /// Online failures are returned to the caller and nothing is queued.
    pub async fn write(
        &self,
        category: &str,
        operation: &str,
        params: Value,
    ) -> Result<WriteOutcome> {
        if !self.connectivity.is_online() {
            let item = self
                .queue
                .enqueue(category, operation, params, self.clock.now_ms());
            return Ok(WriteOutcome::Queued { id: item.id });
        }

        let request = RemoteRequest::new(category, operation, params)
            .with_idempotency_key(Uuid::new_v4().to_string());
        let confirmation = self.write_through(&request, false).await?;
        self.invalidate_for(&request.operation_key()).await;

        let value = match confirmation {
            WriteConfirmation::Applied(value) => value,
            WriteConfirmation::AlreadyApplied => Value::Null,
        };
        Ok(WriteOutcome::Applied { value })
    }

    async fn write_through(
        &self,
        request: &RemoteRequest,
        previously_attempted: bool,
    ) -> std::result::Result<WriteConfirmation<Value>, RemoteError> {
        let remote = &self.remote;
        self.executor
            .execute_idempotent(
                previously_attempted,
                move || async move { remote.already_applied(request).await },
                move || async move { remote.execute(request).await },
            )
            .await
    }

    // == Invalidation ==
    /// Applies the invalidation rule of a confirmed write.
    pub async fn invalidate_for(&self, write_key: &str) -> usize {
        let prefixes = self.router.rules_for(write_key);
        let mut store = self.store.lock().await;
        let removed: usize = prefixes.iter().map(|prefix| store.invalidate(prefix)).sum();
        debug!(write_key, removed, "Applied invalidation rule");
        removed
    }

    pub async fn invalidate(&self, prefix: &str) -> usize {
        self.store.lock().await.invalidate(prefix)
    }

    pub async fn clear(&self) {
        self.store.lock().await.clear();
        info!("Cache cleared");
    }

    /// Removes expired entries from memory and the durable mirror.
    pub async fn cleanup_expired(&self) -> usize {
        self.store.lock().await.cleanup_expired()
    }

    // == Replay ==
    /// Replays queued writes in enqueue order.
    ///
    /// Returns immediately with `skipped` set if a pass is already running.
    /// The pass stops at the first transient failure so later writes never
    /// overtake earlier ones, and when connectivity drops.
    ///
    /// A skipped call leaves a rerun request behind. The running call honors
    /// it before returning, including one that lands just as the guard is
    /// released, so a reconnect during a pass is never lost.
    pub async fn replay_queue(&self) -> ReplayReport {
        let mut report = ReplayReport::default();
        let mut first = true;

        loop {
            // Set before claiming so the owner sees it after releasing
            self.replay_requested.store(true, Ordering::SeqCst);
            let Some(guard) = self.queue.begin_replay() else {
                debug!("Replay already in progress, rerun requested");
                report.skipped = first;
                return report;
            };
            first = false;

            while self.replay_requested.swap(false, Ordering::SeqCst) {
                if !self.connectivity.is_online() {
                    break;
                }
                self.replay_pass(&mut report).await;
            }
            drop(guard);

            if !self.replay_requested.load(Ordering::SeqCst)
                || !self.connectivity.is_online()
                || self.queue.is_empty()
            {
                break;
            }
        }

        if report.replayed + report.dropped + report.failed > 0 {
            info!(
                replayed = report.replayed,
                dropped = report.dropped,
                failed = report.failed,
                remaining = self.queue.len(),
                "Replay pass finished"
            );
        }
        report
    }

    async fn replay_pass(&self, report: &mut ReplayReport) {
        let pending = self.queue.snapshot();
        if !pending.is_empty() {
            info!(pending = pending.len(), "Replaying queued writes");
        }

        for item in pending {
            if !self.connectivity.is_online() {
                info!("Connectivity lost, pausing replay");
                break;
            }

            let previously_attempted = item.attempts > 0;
            // Gone if an operator dropped it during the pass
            let Some(item) = self.queue.record_attempt(&item.id) else {
                continue;
            };

            let request = RemoteRequest::new(&item.category, &item.operation, item.params.clone())
                .with_idempotency_key(item.id.clone());

            match self.write_through(&request, previously_attempted).await {
                Ok(_) => {
                    self.queue.confirm(&item.id);
                    self.invalidate_for(&item.operation_key()).await;
                    report.replayed += 1;
                }
                Err(err) if !err.retryable => {
                    self.queue
                        .drop_item(&item.id, &err.to_string(), self.clock.now_ms());
                    report.dropped += 1;
                }
                Err(err) if self.queue.is_exhausted(&item) => {
                    let reason = format!("gave up after {} attempts: {}", item.attempts, err);
                    self.queue.drop_item(&item.id, &reason, self.clock.now_ms());
                    report.dropped += 1;
                }
                Err(err) => {
                    warn!(
                        id = %item.id,
                        attempts = item.attempts,
                        error = %err,
                        "Queued write failed, keeping it for the next pass"
                    );
                    self.queue.record_failure(&item.id, &err.to_string());
                    report.failed += 1;
                    break;
                }
            }
        }
    }

    /// Administratively removes a queued write.
    pub fn drop_queued(&self, id: &str) -> Result<SyncQueueItem> {
        self.queue
            .drop_item(id, OPERATOR_DROP_REASON, self.clock.now_ms())
            .ok_or_else(|| CacheError::NotFound(format!("queued write '{}'", id)))
    }

    // == Warm-up & Critical Refresh ==
    /// Populates the cache for the configured warm-up reads.
    pub async fn warm_up(&self) -> LoadReport {
        let mut report = LoadReport::default();
        for op in &self.warmup {
            let Some((category, operation)) = op.split_once('.') else {
                warn!(operation = %op, "Skipping malformed warm-up entry");
                continue;
            };
            match self.read(category, operation, Value::Null).await {
                Ok(_) => report.loaded += 1,
                Err(e) => {
                    warn!(operation = %op, error = %e, "Warm-up read failed");
                    report.failed += 1;
                }
            }
        }
        info!(loaded = report.loaded, failed = report.failed, "Cache warm-up finished");
        report
    }

    /// Re-fetches the critical reads, bypassing the cache.
    pub async fn refresh_critical(&self) -> LoadReport {
        let mut report = LoadReport::default();
        for op in &self.critical {
            let Some((category, operation)) = op.split_once('.') else {
                continue;
            };
            match self.refresh(category, operation, Value::Null).await {
                Ok(_) => report.loaded += 1,
                Err(e) => {
                    debug!(operation = %op, error = %e, "Critical refresh failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    // == Diagnostics ==
    pub async fn diagnostics(&self) -> CacheDiagnostics {
        let store = self.store.lock().await;
        let stats = store.stats();
        CacheDiagnostics {
            size: store.len(),
            max_size: store.max_entries(),
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            keys: store.keys(),
            queue_depth: self.queue.len(),
            replay_in_progress: self.queue.is_replaying(),
            persistence_active: store.persistence_active(),
            connectivity: self.connectivity.state(),
            dead_letters: self.queue.dead_letters().len(),
        }
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn pending_writes(&self) -> Vec<SyncQueueItem> {
        self.queue.snapshot()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.queue.subscribe()
    }

    // == Lifecycle ==
    /// Starts cleanup, critical refresh and replay-on-reconnect timers.
    ///
    /// The timers hold weak references, so dropping the last service handle
    /// stops them. Calling this twice replaces the earlier set.
    pub fn start_background(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let set = BackgroundTasks::new(vec![
            tasks::spawn_cleanup_task(weak.clone(), self.cleanup_interval),
            tasks::spawn_refresh_task(weak.clone(), self.refresh_interval),
            tasks::spawn_replay_task(weak, self.connectivity.subscribe()),
        ]);
        info!(
            cleanup_secs = self.cleanup_interval.as_secs(),
            refresh_secs = self.refresh_interval.as_secs(),
            "Background tasks started"
        );
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = Some(set);
    }

    /// Stops background timers. The cache stays usable.
    pub fn close(&self) {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tasks) = tasks {
            tasks.abort_all();
            info!("Background tasks stopped");
        }
    }

    fn flight<'a>(&'a self, key: &'a str) -> Flight<'a> {
        let lock = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        Flight {
            inflight: &self.inflight,
            key,
            lock,
        }
    }
}

/// Share of a per-key fetch lock. The last holder removes the map entry on
/// drop, including when the read is cancelled.
struct Flight<'a> {
    inflight: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // Ours plus the map's
        if inflight
            .get(self.key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2)
        {
            inflight.remove(self.key);
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("queue", &self.queue)
            .field("connectivity", &self.connectivity)
            .finish_non_exhaustive()
    }
}

// == Service Builder ==
/// Assembles a [`CacheService`]. `build` opens it: the store is hydrated
/// from the persistent backend and the queue restored.
pub struct ServiceBuilder {
    remote: Arc<dyn RemoteOperation>,
    max_entries: usize,
    ttl: TtlPolicy,
    router: InvalidationRouter,
    retry: RetryOptions,
    backend: Option<Arc<dyn PersistentBackend>>,
    queue_backend: Option<Arc<dyn QueueBackend>>,
    codec: Option<Arc<dyn PayloadCodec>>,
    clock: Arc<dyn Clock>,
    queue_max_attempts: u32,
    initial: Connectivity,
    warmup: Vec<String>,
    critical: Vec<String>,
    cleanup_interval: Duration,
    refresh_interval: Duration,
}

impl ServiceBuilder {
    pub fn new(remote: Arc<dyn RemoteOperation>) -> Self {
        Self {
            remote,
            max_entries: 1000,
            ttl: TtlPolicy::records_default(DEFAULT_TTL),
            router: InvalidationRouter::records_default(),
            retry: RetryOptions::default(),
            backend: None,
            queue_backend: None,
            codec: None,
            clock: Arc::new(SystemClock),
            queue_max_attempts: 10,
            initial: Connectivity::Online,
            warmup: DEFAULT_WARMUP.iter().map(|s| s.to_string()).collect(),
            critical: DEFAULT_CRITICAL.iter().map(|s| s.to_string()).collect(),
            cleanup_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(300),
        }
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn invalidation(mut self, router: InvalidationRouter) -> Self {
        self.router = router;
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Uses one backend for both the cache mirror and the sync queue.
    pub fn persistence<B>(mut self, backend: Arc<B>) -> Self
    where
        B: PersistentBackend + QueueBackend + 'static,
    {
        let mirror_backend: Arc<dyn PersistentBackend> = backend.clone();
        let queue_backend: Arc<dyn QueueBackend> = backend;
        self.backend = Some(mirror_backend);
        self.queue_backend = Some(queue_backend);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Zero keeps failing items queued forever.
    pub fn queue_max_attempts(mut self, max_attempts: u32) -> Self {
        self.queue_max_attempts = max_attempts;
        self
    }

    pub fn initial_connectivity(mut self, state: Connectivity) -> Self {
        self.initial = state;
        self
    }

    pub fn warmup(mut self, operations: Vec<String>) -> Self {
        self.warmup = operations;
        self
    }

    pub fn critical(mut self, operations: Vec<String>) -> Self {
        self.critical = operations;
        self
    }

    pub fn intervals(mut self, cleanup: Duration, refresh: Duration) -> Self {
        self.cleanup_interval = cleanup;
        self.refresh_interval = refresh;
        self
    }

    pub fn build(self) -> Arc<CacheService> {
        let mirror = match self.backend {
            Some(backend) => Mirror::new(backend, self.codec),
            None => Mirror::disabled(),
        };
        let mut store = CacheStore::new(self.max_entries, self.ttl)
            .with_clock(self.clock.clone())
            .with_mirror(mirror);
        if store.persistence_active() {
            store.hydrate();
        }

        let queue_backend: Arc<dyn QueueBackend> = match self.queue_backend {
            Some(backend) => backend,
            None => Arc::new(NoopBackend),
        };
        let queue = SyncQueue::open(queue_backend, self.queue_max_attempts);

        Arc::new(CacheService {
            store: Mutex::new(store),
            remote: self.remote,
            executor: RetryExecutor::new(self.retry),
            router: self.router,
            queue: Arc::new(queue),
            connectivity: Arc::new(ConnectivityMonitor::new(self.initial)),
            inflight: StdMutex::new(HashMap::new()),
            replay_requested: AtomicBool::new(false),
            clock: self.clock,
            warmup: self.warmup,
            critical: self.critical,
            cleanup_interval: self.cleanup_interval,
            refresh_interval: self.refresh_interval,
            tasks: StdMutex::new(None),
        })
    }
}
