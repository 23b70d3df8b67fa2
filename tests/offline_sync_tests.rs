//! Integration Tests for Offline Sync and Persistence
//!
//! Exercises the service end to end with durable backends, restarts and
//! connectivity changes.

use std::sync::Arc;
use std::time::Duration;

use offline_cache::cache::ManualClock;
use offline_cache::persist::{GzipCodec, MemoryBackend, SqliteBackend};
use offline_cache::remote::testing::ScriptedRemote;
use offline_cache::retry::RetryOptions;
use offline_cache::{CacheService, RemoteError, SyncEvent, WriteOutcome};
use serde_json::{json, Value};

fn fast_retry() -> RetryOptions {
    RetryOptions::default()
        .with_max_retries(3)
        .with_delays(Duration::from_millis(10), Duration::from_millis(80))
}

// == Restart & Hydration ==

#[tokio::test]
async fn test_cache_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let clock = Arc::new(ManualClock::new(10_000_000));
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("equipment.getAll", json!([{"id": 1}]));
    remote.respond("dashboard.getStats", json!({"open": 4}));

    {
        let service = CacheService::builder(remote.clone())
            .persistence(Arc::new(SqliteBackend::open(&path).unwrap()))
            .codec(Arc::new(GzipCodec::default()))
            .clock(clock.clone())
            .build();
        service.read("equipment", "getAll", Value::Null).await.unwrap();
        service.read("dashboard", "getStats", Value::Null).await.unwrap();
    }

    // dashboard.getStats lives one minute, equipment.getAll ten
    clock.advance(Duration::from_secs(3 * 60));

    let restarted = CacheService::builder(remote.clone())
        .persistence(Arc::new(SqliteBackend::open(&path).unwrap()))
        .codec(Arc::new(GzipCodec::default()))
        .clock(clock.clone())
        .build();

    let diag = restarted.diagnostics().await;
    assert!(diag.persistence_active);
    assert_eq!(diag.keys, vec!["equipment.getAll".to_string()]);

    restarted.read("equipment", "getAll", Value::Null).await.unwrap();
    assert_eq!(remote.calls("equipment.getAll"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_survives_restart_and_replays_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let remote = Arc::new(ScriptedRemote::new());
    for op in ["create", "update", "delete"] {
        remote.respond(&format!("equipment.{}", op), json!({"ok": true}));
    }

    {
        let service = CacheService::builder(remote.clone())
            .persistence(Arc::new(SqliteBackend::open(&path).unwrap()))
            .build();
        service.connectivity().mark_offline();
        for op in ["create", "update", "delete"] {
            let outcome = service.write("equipment", op, json!({"id": 1})).await.unwrap();
            assert!(matches!(outcome, WriteOutcome::Queued { .. }));
        }
    }
    assert_eq!(remote.total_calls(), 0);

    let restarted = CacheService::builder(remote.clone())
        .persistence(Arc::new(SqliteBackend::open(&path).unwrap()))
        .retry(fast_retry())
        .build();
    assert_eq!(restarted.queue().len(), 3);

    let report = restarted.replay_queue().await;

    assert_eq!(report.replayed, 3);
    assert_eq!(
        remote.log(),
        vec!["equipment.create", "equipment.update", "equipment.delete"]
    );
    assert!(restarted.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_online_drains_restored_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("startup.db");
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("equipment.update", json!({"ok": true}));

    {
        let service = CacheService::builder(remote.clone())
            .persistence(Arc::new(SqliteBackend::open(&path).unwrap()))
            .build();
        service.connectivity().mark_offline();
        service.write("equipment", "update", json!({"id": 2, "status": "retired"})).await.unwrap();
    }

    let restarted = CacheService::builder(remote.clone())
        .persistence(Arc::new(SqliteBackend::open(&path).unwrap()))
        .build();
    assert_eq!(restarted.queue().len(), 1);

    restarted.start_background();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(remote.calls("equipment.update"), 1);
    assert!(restarted.queue().is_empty());
    restarted.close();
}

// == Idempotent Replay ==

#[tokio::test(start_paused = true)]
async fn test_lost_response_during_replay_writes_once() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("inspections.complete", json!({"ok": true}));
    // The first attempt lands remotely but its answer never arrives
    remote.lose_responses("inspections.complete", 1);
    let service = CacheService::builder(remote.clone())
        .retry(fast_retry())
        .build();
    let mut events = service.subscribe();

    service.connectivity().mark_offline();
    let WriteOutcome::Queued { id } = service
        .write("inspections", "complete", json!({"id": 8}))
        .await
        .unwrap()
    else {
        panic!("write should have been queued");
    };
    service.connectivity().mark_online();

    let report = service.replay_queue().await;

    assert_eq!(report.replayed, 1);
    assert_eq!(remote.calls("inspections.complete"), 1);
    assert_eq!(remote.checks(), 1);
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Replayed { id });
}

// == Background Replay ==

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_in_background() {
    let remote = Arc::new(ScriptedRemote::new());
    for op in ["a", "b", "c"] {
        remote.respond(&format!("notes.{}", op), json!("ok"));
    }
    let service = CacheService::builder(remote.clone())
        .retry(fast_retry())
        .build();
    service.start_background();
    let mut events = service.subscribe();

    service.connectivity().mark_offline();
    for op in ["a", "b", "c"] {
        service.write("notes", op, json!({})).await.unwrap();
    }
    service.connectivity().mark_online();

    for _ in 0..3 {
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Replayed { .. }));
    }
    assert_eq!(remote.log(), vec!["notes.a", "notes.b", "notes.c"]);
    service.close();
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_keep_order_across_passes() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("notes.a", json!("ok"));
    remote.respond("notes.b", json!("ok"));
    // Outlasts one pass of retries (1 attempt + 3 retries)
    remote.fail_next("notes.a", RemoteError::transient("LOCKED", "busy"), 4);
    let service = CacheService::builder(remote.clone())
        .retry(fast_retry())
        .build();
    service.connectivity().mark_offline();
    service.write("notes", "a", json!({})).await.unwrap();
    service.write("notes", "b", json!({})).await.unwrap();
    service.connectivity().mark_online();

    let first = service.replay_queue().await;
    assert_eq!((first.replayed, first.failed), (0, 1));
    assert_eq!(remote.calls("notes.b"), 0);

    let second = service.replay_queue().await;
    assert_eq!(second.replayed, 2);
    assert_eq!(remote.log().last().map(String::as_str), Some("notes.b"));
}

// == Degraded Persistence ==

#[tokio::test]
async fn test_failing_storage_degrades_to_memory() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_failing(true);
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("settings.get", json!({"units": "metric"}));
    let service = CacheService::builder(remote.clone())
        .persistence(backend.clone())
        .build();

    let value = service.read("settings", "get", Value::Null).await.unwrap();
    assert_eq!(value, json!({"units": "metric"}));
    service.read("settings", "get", Value::Null).await.unwrap();

    assert_eq!(remote.calls("settings.get"), 1);
    assert_eq!(backend.entry_count(), 0);

    service.connectivity().mark_offline();
    let outcome = service.write("settings", "update", json!({})).await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Queued { .. }));
    assert_eq!(service.queue().len(), 1);
}

// == Invalidation Precision ==

#[tokio::test]
async fn test_write_purges_only_configured_prefixes() {
    let remote = Arc::new(ScriptedRemote::new());
    for op in [
        "inspections.getAll",
        "inspections.getOverdue",
        "equipment.getById",
        "equipment.getAll",
        "workOrders.getOpen",
        "inspections.complete",
    ] {
        remote.respond(op, json!([]));
    }
    let service = CacheService::builder(remote).build();

    service.read("inspections", "getAll", Value::Null).await.unwrap();
    service.read("inspections", "getOverdue", Value::Null).await.unwrap();
    service.read("equipment", "getById", json!({"id": 2})).await.unwrap();
    service.read("equipment", "getAll", Value::Null).await.unwrap();
    service.read("workOrders", "getOpen", Value::Null).await.unwrap();

    service
        .write("inspections", "complete", json!({"id": 10}))
        .await
        .unwrap();

    assert_eq!(
        service.diagnostics().await.keys,
        vec!["equipment.getAll".to_string(), "workOrders.getOpen".to_string()]
    );
}

// == Lifecycle ==

#[tokio::test(start_paused = true)]
async fn test_close_stops_background_refresh() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("dashboard.getStats", json!({}));
    let service = CacheService::builder(remote.clone())
        .critical(vec!["dashboard.getStats".to_string()])
        .intervals(Duration::from_secs(60), Duration::from_secs(5))
        .build();

    service.start_background();
    tokio::time::sleep(Duration::from_secs(11)).await;
    let before = remote.calls("dashboard.getStats");
    assert_eq!(before, 2);

    service.close();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.calls("dashboard.getStats"), before);
}
