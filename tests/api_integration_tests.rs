//! Integration Tests for API Endpoints
//!
//! Tests the full request/response cycle of the sidecar API.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use offline_cache::api::create_router;
use offline_cache::remote::testing::ScriptedRemote;
use offline_cache::{AppState, CacheService, RemoteError};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app(remote: Arc<ScriptedRemote>) -> Router {
    let service = CacheService::builder(remote).build();
    create_router(AppState::new(service))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// == Read Endpoint Tests ==

#[tokio::test]
async fn test_read_endpoint_caches_result() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("equipment.getAll", json!([{"id": 1, "name": "Boiler"}]));
    let app = create_test_app(remote.clone());

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/ops/read",
                json!({"category": "equipment", "operation": "getAll"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_to_json(response.into_body()).await;
        assert_eq!(json["key"], "equipment.getAll");
        assert_eq!(json["value"][0]["name"], "Boiler");
    }

    assert_eq!(remote.calls("equipment.getAll"), 1);

    let stats = app.oneshot(empty("GET", "/stats")).await.unwrap();
    let json = body_to_json(stats.into_body()).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["hit_rate"], 0.5);
    assert_eq!(json["keys"], json!(["equipment.getAll"]));
}

#[tokio::test]
async fn test_read_endpoint_invalid_request() {
    let app = create_test_app(Arc::new(ScriptedRemote::new()));

    let response = app
        .oneshot(post_json(
            "/ops/read",
            json!({"category": "", "operation": "getAll"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("category"));
}

#[tokio::test]
async fn test_read_endpoint_permanent_error() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.fail("equipment.getById", RemoteError::permanent("NOT_FOUND", "no such equipment"));
    let app = create_test_app(remote);

    let response = app
        .oneshot(post_json(
            "/ops/read",
            json!({"category": "equipment", "operation": "getById", "params": {"id": 99}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn test_refresh_endpoint_bypasses_cache() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("dashboard.getStats", json!({"overdue": 1}));
    let app = create_test_app(remote.clone());
    let body = json!({"category": "dashboard", "operation": "getStats"});

    app.clone().oneshot(post_json("/ops/read", body.clone())).await.unwrap();
    let response = app.oneshot(post_json("/ops/refresh", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remote.calls("dashboard.getStats"), 2);
}

// == Write Endpoint Tests ==

#[tokio::test]
async fn test_write_endpoint_online_invalidates() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("workOrders.getOpen", json!([]));
    remote.respond("workOrders.create", json!({"id": 12}));
    let app = create_test_app(remote.clone());

    app.clone()
        .oneshot(post_json(
            "/ops/read",
            json!({"category": "workOrders", "operation": "getOpen"}),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/ops/write",
            json!({"category": "workOrders", "operation": "create", "params": {"title": "Leak"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json, json!({"status": "applied", "value": {"id": 12}}));

    let stats = app.oneshot(empty("GET", "/stats")).await.unwrap();
    let json = body_to_json(stats.into_body()).await;
    assert_eq!(json["size"], 0);
}

#[tokio::test]
async fn test_offline_write_queues_then_syncs() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("inspections.complete", json!({"ok": true}));
    let app = create_test_app(remote.clone());

    let response = app
        .clone()
        .oneshot(empty("POST", "/connectivity/offline"))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json, json!({"state": "offline", "changed": true}));

    let response = app
        .clone()
        .oneshot(post_json(
            "/ops/write",
            json!({"category": "inspections", "operation": "complete", "params": {"id": 5}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "queued");

    let queue = app.clone().oneshot(empty("GET", "/queue")).await.unwrap();
    let json = body_to_json(queue.into_body()).await;
    assert_eq!(json["pending"].as_array().unwrap().len(), 1);
    assert_eq!(json["pending"][0]["operation"], "complete");

    app.clone()
        .oneshot(empty("POST", "/connectivity/online"))
        .await
        .unwrap();
    let response = app.clone().oneshot(empty("POST", "/sync")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["replayed"], 1);

    assert_eq!(remote.calls("inspections.complete"), 1);
    let stats = app.oneshot(empty("GET", "/stats")).await.unwrap();
    let json = body_to_json(stats.into_body()).await;
    assert_eq!(json["queue_depth"], 0);
}

// == Queue Endpoint Tests ==

#[tokio::test]
async fn test_drop_queued_write() {
    let app = create_test_app(Arc::new(ScriptedRemote::new()));
    app.clone()
        .oneshot(empty("POST", "/connectivity/offline"))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(post_json(
            "/ops/write",
            json!({"category": "equipment", "operation": "delete", "params": {"id": 3}}),
        ))
        .await
        .unwrap();
    let id = body_to_json(response.into_body()).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(empty("DELETE", &format!("/queue/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let queue = app.oneshot(empty("GET", "/queue")).await.unwrap();
    let json = body_to_json(queue.into_body()).await;
    assert!(json["pending"].as_array().unwrap().is_empty());
    assert_eq!(json["dead_letters"][0]["reason"], "dropped by operator");
}

// == Cache Control Tests ==

#[tokio::test]
async fn test_invalidate_prefix_and_clear() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("equipment.getAll", json!([]));
    remote.respond("compliance.getDocuments", json!([]));
    let app = create_test_app(remote);

    for (category, operation) in [("equipment", "getAll"), ("compliance", "getDocuments")] {
        app.clone()
            .oneshot(post_json(
                "/ops/read",
                json!({"category": category, "operation": operation}),
            ))
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(empty("DELETE", "/cache/equipment."))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["removed"], 1);

    let response = app.clone().oneshot(empty("DELETE", "/cache")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = app.oneshot(empty("GET", "/stats")).await.unwrap();
    let json = body_to_json(stats.into_body()).await;
    assert_eq!(json["size"], 0);
}

#[tokio::test]
async fn test_warmup_endpoint() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond("equipment.getAll", json!([]));
    let service = CacheService::builder(remote)
        .warmup(vec!["equipment.getAll".to_string()])
        .build();
    let app = create_router(AppState::new(service));

    let response = app.oneshot(empty("POST", "/warmup")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json, json!({"loaded": 1, "failed": 0}));
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(Arc::new(ScriptedRemote::new()));

    let response = app.oneshot(empty("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["connectivity"], "online");
    assert!(json.get("timestamp").is_some());
}
