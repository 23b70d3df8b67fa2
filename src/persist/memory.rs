//! In-process backends: a map-backed fake and a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{PersistResult, PersistedEntry, PersistentBackend, QueueBackend};
use crate::error::PersistenceError;
use crate::sync::SyncQueueItem;

// == Memory Backend ==
/// Map-backed backend. Survives "restarts" within one process when shared
/// through an `Arc`, which is what the tests rely on.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, PersistedEntry>>,
    queue: Mutex<Vec<SyncQueueItem>>,
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating a broken disk.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entry(&self, key: &str) -> Option<PersistedEntry> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    fn check(&self) -> PersistResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::Codec(std::io::Error::other(
                "simulated storage failure",
            )))
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> PersistResult<MutexGuard<'_, HashMap<String, PersistedEntry>>> {
        self.check()?;
        self.entries.lock().map_err(|_| PersistenceError::LockPoisoned)
    }

    fn queue(&self) -> PersistResult<MutexGuard<'_, Vec<SyncQueueItem>>> {
        self.check()?;
        self.queue.lock().map_err(|_| PersistenceError::LockPoisoned)
    }
}

impl PersistentBackend for MemoryBackend {
    fn load_all(&self) -> PersistResult<Vec<PersistedEntry>> {
        Ok(self.entries()?.values().cloned().collect())
    }

    fn save(&self, entry: &PersistedEntry) -> PersistResult<()> {
        self.entries()?.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> PersistResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> PersistResult<usize> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn clear(&self) -> PersistResult<()> {
        self.entries()?.clear();
        Ok(())
    }
}

impl QueueBackend for MemoryBackend {
    fn load_queue(&self) -> PersistResult<Vec<SyncQueueItem>> {
        let mut items = self.queue()?.clone();
        items.sort_by_key(|item| item.seq);
        Ok(items)
    }

    fn push(&self, item: &SyncQueueItem) -> PersistResult<()> {
        self.queue()?.push(item.clone());
        Ok(())
    }

    fn update(&self, item: &SyncQueueItem) -> PersistResult<()> {
        let mut queue = self.queue()?;
        if let Some(existing) = queue.iter_mut().find(|i| i.id == item.id) {
            *existing = item.clone();
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> PersistResult<()> {
        self.queue()?.retain(|item| item.id != id);
        Ok(())
    }
}

// == Noop Backend ==
/// Backend used when persistence is disabled or could not be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl PersistentBackend for NoopBackend {
    fn load_all(&self) -> PersistResult<Vec<PersistedEntry>> {
        Ok(Vec::new())
    }

    fn save(&self, _entry: &PersistedEntry) -> PersistResult<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> PersistResult<()> {
        Ok(())
    }

    fn delete_prefix(&self, _prefix: &str) -> PersistResult<usize> {
        Ok(0)
    }

    fn clear(&self) -> PersistResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

impl QueueBackend for NoopBackend {
    fn load_queue(&self) -> PersistResult<Vec<SyncQueueItem>> {
        Ok(Vec::new())
    }

    fn push(&self, _item: &SyncQueueItem) -> PersistResult<()> {
        Ok(())
    }

    fn update(&self, _item: &SyncQueueItem) -> PersistResult<()> {
        Ok(())
    }

    fn remove(&self, _id: &str) -> PersistResult<()> {
        Ok(())
    }
}
