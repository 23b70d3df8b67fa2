//! Sync Queue
//!
//! Durable, ordered list of writes that could not be confirmed yet. Items
//! leave the queue only when their write is confirmed, or when they are
//! dropped into the dead-letter list after exhausting their attempts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::operation_key;
use crate::persist::QueueBackend;

/// Capacity of the completion-event channel.
const EVENT_CAPACITY: usize = 256;

// == Queue Item ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncQueueItem {
    pub id: String,
    /// Enqueue order, strictly increasing
    pub seq: u64,
    pub category: String,
    pub operation: String,
    pub params: Value,
    /// Unix milliseconds
    pub enqueued_at: u64,
    /// Replay attempts made so far
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    pub fn operation_key(&self) -> String {
        operation_key(&self.category, &self.operation)
    }
}

/// An item removed without being confirmed.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub item: SyncQueueItem,
    pub reason: String,
    pub dropped_at: u64,
}

/// Completion signal for queued writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Replayed { id: String },
    Dropped { id: String, reason: String },
}

// == Sync Queue ==
pub struct SyncQueue {
    items: Mutex<VecDeque<SyncQueueItem>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    backend: Arc<dyn QueueBackend>,
    replaying: AtomicBool,
    next_seq: AtomicU64,
    max_attempts: u32,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncQueue {
    /// Opens the queue, restoring items persisted by a previous run.
    ///
    /// `max_attempts` of zero disables the attempt bound.
    pub fn open(backend: Arc<dyn QueueBackend>, max_attempts: u32) -> Self {
        let restored = match backend.load_queue() {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted sync queue, starting empty");
                Vec::new()
            }
        };
        if !restored.is_empty() {
            info!(pending = restored.len(), "Restored pending writes");
        }

        let next_seq = restored.iter().map(|i| i.seq + 1).max().unwrap_or(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            items: Mutex::new(restored.into()),
            dead_letters: Mutex::new(Vec::new()),
            backend,
            replaying: AtomicBool::new(false),
            next_seq: AtomicU64::new(next_seq),
            max_attempts,
            events,
        }
    }

    // == Enqueue ==
    pub fn enqueue(
        &self,
        category: &str,
        operation: &str,
        params: Value,
        now_ms: u64,
    ) -> SyncQueueItem {
        let item = SyncQueueItem {
            id: Uuid::new_v4().to_string(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            category: category.to_string(),
            operation: operation.to_string(),
            params,
            enqueued_at: now_ms,
            attempts: 0,
            last_error: None,
        };

        if let Err(e) = self.backend.push(&item) {
            warn!(id = %item.id, error = %e, "Failed to persist queued write, kept in memory");
        }
        self.items().push_back(item.clone());
        info!(id = %item.id, operation = %item.operation_key(), "Queued write for replay");
        item
    }

    /// Pending items in enqueue order.
    pub fn snapshot(&self) -> Vec<SyncQueueItem> {
        self.items().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items().iter().any(|item| item.id == id)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    // == Attempt Bookkeeping ==
    /// Counts a replay attempt before it is made, so a crash mid-write is
    /// visible on the next run. Returns the updated item.
    pub fn record_attempt(&self, id: &str) -> Option<SyncQueueItem> {
        let updated = {
            let mut items = self.items();
            let item = items.iter_mut().find(|item| item.id == id)?;
            item.attempts += 1;
            item.clone()
        };
        self.persist_update(&updated);
        Some(updated)
    }

    pub fn record_failure(&self, id: &str, reason: &str) {
        let updated = {
            let mut items = self.items();
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                return;
            };
            item.last_error = Some(reason.to_string());
            item.clone()
        };
        self.persist_update(&updated);
    }

    /// True once an item has used up its attempts.
    pub fn is_exhausted(&self, item: &SyncQueueItem) -> bool {
        self.max_attempts > 0 && item.attempts >= self.max_attempts
    }

    // == Removal ==
    /// Removes an item whose write has been confirmed.
    pub fn confirm(&self, id: &str) -> bool {
        if self.take(id).is_none() {
            return false;
        }
        let _ = self.events.send(SyncEvent::Replayed { id: id.to_string() });
        true
    }

    /// Moves an item to the dead-letter list.
    pub fn drop_item(&self, id: &str, reason: &str, now_ms: u64) -> Option<SyncQueueItem> {
        let item = self.take(id)?;
        error!(
            id,
            operation = %item.operation_key(),
            attempts = item.attempts,
            reason,
            "Dropped queued write"
        );

        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeadLetter {
                item: item.clone(),
                reason: reason.to_string(),
                dropped_at: now_ms,
            });
        let _ = self.events.send(SyncEvent::Dropped {
            id: id.to_string(),
            reason: reason.to_string(),
        });
        Some(item)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // == Replay Guard ==
    /// Claims the replay slot. `None` while another pass is running.
    pub fn begin_replay(&self) -> Option<ReplayGuard<'_>> {
        self.replaying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReplayGuard {
                flag: &self.replaying,
            })
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::Acquire)
    }

    fn take(&self, id: &str) -> Option<SyncQueueItem> {
        let item = {
            let mut items = self.items();
            let pos = items.iter().position(|item| item.id == id)?;
            items.remove(pos)?
        };
        if let Err(e) = self.backend.remove(id) {
            warn!(id, error = %e, "Failed to remove persisted queue item");
        }
        Some(item)
    }

    fn persist_update(&self, item: &SyncQueueItem) {
        if let Err(e) = self.backend.update(item) {
            warn!(id = %item.id, error = %e, "Failed to persist queue item update");
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<SyncQueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("depth", &self.len())
            .field("replaying", &self.is_replaying())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Releases the replay slot on drop.
pub struct ReplayGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use serde_json::json;

    fn queue(backend: Arc<MemoryBackend>) -> SyncQueue {
        SyncQueue::open(backend, 3)
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let q = queue(Arc::new(MemoryBackend::new()));
        let a = q.enqueue("equipment", "create", json!({"name": "A"}), 1);
        let b = q.enqueue("equipment", "create", json!({"name": "B"}), 1);
        let c = q.enqueue("equipment", "create", json!({"name": "C"}), 1);

        let ids: Vec<String> = q.snapshot().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert!(a.seq < b.seq && b.seq < c.seq);
    }

    #[test]
    fn test_queue_survives_reopen() {
        let backend = Arc::new(MemoryBackend::new());
        let first = queue(backend.clone());
        let a = first.enqueue("workOrders", "close", json!({"id": 9}), 5);
        first.record_attempt(&a.id);
        drop(first);

        let reopened = queue(backend);
        let items = reopened.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, a.id);
        assert_eq!(items[0].attempts, 1);

        let next = reopened.enqueue("workOrders", "close", json!({"id": 10}), 6);
        assert!(next.seq > a.seq);
    }

    #[test]
    fn test_confirm_removes_and_signals() {
        let backend = Arc::new(MemoryBackend::new());
        let q = queue(backend.clone());
        let mut events = q.subscribe();
        let a = q.enqueue("equipment", "update", json!({}), 1);

        assert!(q.confirm(&a.id));
        assert!(!q.confirm(&a.id));
        assert!(q.is_empty());
        assert!(backend.load_queue().unwrap().is_empty());
        assert_eq!(events.try_recv().unwrap(), SyncEvent::Replayed { id: a.id });
    }

    #[test]
    fn test_drop_moves_to_dead_letters() {
        let q = queue(Arc::new(MemoryBackend::new()));
        let mut events = q.subscribe();
        let a = q.enqueue("equipment", "delete", json!({"id": 1}), 1);

        let dropped = q.drop_item(&a.id, "VALIDATION: in use", 2).unwrap();
        assert_eq!(dropped.id, a.id);
        assert!(!q.contains(&a.id));

        let dead = q.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "VALIDATION: in use");
        assert!(matches!(events.try_recv().unwrap(), SyncEvent::Dropped { .. }));
    }

    #[test]
    fn test_exhaustion_bound() {
        let q = queue(Arc::new(MemoryBackend::new()));
        let a = q.enqueue("equipment", "update", json!({}), 1);

        let mut item = a.clone();
        for _ in 0..3 {
            assert!(!q.is_exhausted(&item));
            item = q.record_attempt(&a.id).unwrap();
        }
        assert!(q.is_exhausted(&item));

        let unbounded = SyncQueue::open(Arc::new(MemoryBackend::new()), 0);
        assert!(!unbounded.is_exhausted(&item));
    }

    #[test]
    fn test_replay_guard_is_exclusive() {
        let q = queue(Arc::new(MemoryBackend::new()));

        let guard = q.begin_replay().expect("first claim succeeds");
        assert!(q.is_replaying());
        assert!(q.begin_replay().is_none());

        drop(guard);
        assert!(!q.is_replaying());
        assert!(q.begin_replay().is_some());
    }

    #[test]
    fn test_persistence_failure_keeps_item_in_memory() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_failing(true);
        let q = queue(backend);

        let a = q.enqueue("equipment", "create", json!({}), 1);
        assert!(q.contains(&a.id));
        assert!(q.confirm(&a.id));
    }
}
