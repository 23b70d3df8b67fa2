//! SQLite backend for cached entries and the sync queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use tracing::info;

use super::{PersistResult, PersistedEntry, PersistentBackend, QueueBackend};
use crate::error::PersistenceError;
use crate::sync::SyncQueueItem;

/// Schema for the cache mirror and pending writes.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    compressed INTEGER NOT NULL DEFAULT 0,
    inserted_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    category TEXT NOT NULL,
    operation TEXT NOT NULL,
    params TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_seq ON sync_queue(seq);
"#;

/// SQLite-based storage.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        info!("Opened cache database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Database that lives only as long as this value.
    pub fn open_in_memory() -> PersistResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> PersistResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }
}

impl PersistentBackend for SqliteBackend {
    fn load_all(&self) -> PersistResult<Vec<PersistedEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, payload, compressed, inserted_at FROM cache_entries ORDER BY inserted_at",
        )?;

        let entries = stmt
            .query_map([], |row| {
                Ok(PersistedEntry {
                    key: row.get(0)?,
                    payload: row.get(1)?,
                    compressed: row.get(2)?,
                    inserted_at: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn save(&self, entry: &PersistedEntry) -> PersistResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache_entries (key, payload, compressed, inserted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.key,
                entry.payload,
                entry.compressed,
                entry.inserted_at as i64
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> PersistResult<()> {
        self.conn()?
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> PersistResult<usize> {
        // substr comparison avoids LIKE wildcard escaping of '_' and '%'
        let removed = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(removed)
    }

    fn clear(&self) -> PersistResult<()> {
        self.conn()?.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }
}

impl QueueBackend for SqliteBackend {
    fn load_queue(&self) -> PersistResult<Vec<SyncQueueItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, seq, category, operation, params, enqueued_at, attempts, last_error
             FROM sync_queue ORDER BY seq",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, seq, category, operation, params, enqueued_at, attempts, last_error)|
                 -> PersistResult<SyncQueueItem> {
                    Ok(SyncQueueItem {
                        id,
                        seq: seq as u64,
                        category,
                        operation,
                        params: serde_json::from_str(&params)?,
                        enqueued_at: enqueued_at as u64,
                        attempts: attempts as u32,
                        last_error,
                    })
                },
            )
            .collect()
    }

    fn push(&self, item: &SyncQueueItem) -> PersistResult<()> {
        let params_json = serde_json::to_string(&item.params)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sync_queue
             (id, seq, category, operation, params, enqueued_at, attempts, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item.id,
                item.seq as i64,
                item.category,
                item.operation,
                params_json,
                item.enqueued_at as i64,
                item.attempts as i64,
                item.last_error
            ],
        )?;
        Ok(())
    }

    fn update(&self, item: &SyncQueueItem) -> PersistResult<()> {
        self.conn()?.execute(
            "UPDATE sync_queue SET attempts = ?2, last_error = ?3 WHERE id = ?1",
            params![item.id, item.attempts as i64, item.last_error],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> PersistResult<()> {
        self.conn()?
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }
}

impl SqliteBackend {
    /// Number of mirrored cache rows. Used by diagnostics and tests.
    pub fn entry_count(&self) -> PersistResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, inserted_at: u64) -> PersistedEntry {
        PersistedEntry {
            key: key.to_string(),
            payload: br#"[1,2,3]"#.to_vec(),
            compressed: false,
            inserted_at,
        }
    }

    fn item(id: &str, seq: u64) -> SyncQueueItem {
        SyncQueueItem {
            id: id.to_string(),
            seq,
            category: "equipment".to_string(),
            operation: "update".to_string(),
            params: json!({"id": seq, "status": "retired"}),
            enqueued_at: 1_700_000_000_000,
            attempts: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_save_load_replace() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.save(&entry("equipment.getAll", 10)).unwrap();
        db.save(&entry("equipment.getAll", 20)).unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].inserted_at, 20);
        assert_eq!(loaded[0].payload, br#"[1,2,3]"#.to_vec());
    }

    #[test]
    fn test_delete_prefix_treats_underscore_literally() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.save(&entry("work_orders.getAll", 1)).unwrap();
        db.save(&entry("workXorders.getAll", 1)).unwrap();
        db.save(&entry("work_orders.getOpen", 1)).unwrap();

        assert_eq!(db.delete_prefix("work_orders.").unwrap(), 2);
        assert_eq!(db.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_queue_roundtrip_preserves_order() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.push(&item("c", 3)).unwrap();
        db.push(&item("a", 1)).unwrap();
        db.push(&item("b", 2)).unwrap();

        let mut updated = item("a", 1);
        updated.attempts = 2;
        updated.last_error = Some("TIMEOUT".to_string());
        db.update(&updated).unwrap();
        db.remove("b").unwrap();

        let loaded = db.load_queue().unwrap();
        let ids: Vec<&str> = loaded.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(loaded[0].attempts, 2);
        assert_eq!(loaded[0].params, json!({"id": 1, "status": "retired"}));
    }

    #[test]
    fn test_open_on_disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let db = SqliteBackend::open(&path).unwrap();
            db.save(&entry("dashboard.getStats", 5)).unwrap();
        }

        let db = SqliteBackend::open(&path).unwrap();
        assert_eq!(db.load_all().unwrap().len(), 1);
    }
}
