//! Handler-level tests for the admin surface using
//! `tower::ServiceExt::oneshot` — no TCP port, fresh state per test.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use portico_admin::{build_admin_router, AdminState};
use portico_core::config::PorticoConfig;
use portico_core::model::{Backend, HostRule, RateLimitPolicy};
use portico_observability::LogSink;
use portico_proxy::DataPlane;
use portico_store::MemoryStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceExt; // .oneshot()

// ── Helpers ──────────────────────────────────────────────────────────────────

// The returned sender keeps the sink's flush task alive.
fn make_state(store: Arc<MemoryStore>) -> (Arc<AdminState>, watch::Sender<bool>) {
    let config = PorticoConfig::default();
    let (tx, shutdown_rx) = watch::channel(false);
    let (sink, _task) = LogSink::start(store.clone(), config.sink.clone(), shutdown_rx);
    let state = Arc::new(AdminState {
        data_plane: Arc::new(DataPlane::new(store, sink, &config)),
        started_at: Instant::now(),
    });
    (state, tx)
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn host_rule(host: &str) -> HostRule {
    HostRule {
        id: 1,
        host: host.into(),
        rate_limit: RateLimitPolicy {
            enabled: false,
            quota: 0,
            period_secs: 0,
        },
        log_retention_days: 0,
        health_check_enabled: false,
        backends: vec![Backend {
            id: 1,
            url: "http://u1.test".into(),
            weight: 1,
            active: true,
        }],
    }
}

// ── Health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok_with_db_status() {
    let (state, _guard) = make_state(Arc::new(MemoryStore::new()));
    let app = build_admin_router(state);
    let resp = app.oneshot(get_req("/admin/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let j = body_json(resp).await;
    assert_eq!(j["status"], "ok");
    assert_eq!(j["db"], "connected");
    assert!(j["backends_health"].is_object());
    assert_eq!(j["routable_hosts"], 0);
}

// ── Refresh signals ──────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_routing_makes_new_rules_visible() {
    let store = Arc::new(MemoryStore::new());
    let (state, _guard) = make_state(store.clone());
    assert!(state.data_plane.routing.lookup("api.test").is_none());

    store.set_host_rules(vec![host_rule("api.test")]);
    let app = build_admin_router(Arc::clone(&state));
    let resp = app.oneshot(post_req("/admin/refresh/routing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["refreshed"], "routing");

    assert!(state.data_plane.routing.lookup("api.test").is_some());
}

#[tokio::test]
async fn refresh_filters_and_rate_limits_return_ok() {
    let (state, _guard) = make_state(Arc::new(MemoryStore::new()));

    let app = build_admin_router(Arc::clone(&state));
    let resp = app.oneshot(post_req("/admin/refresh/filters")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app = build_admin_router(state);
    let resp = app
        .oneshot(post_req("/admin/refresh/rate-limits"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    store.set_host_rules(vec![host_rule("api.test")]);
    let (state, _guard) = make_state(store);

    for _ in 0..3 {
        let app = build_admin_router(Arc::clone(&state));
        let resp = app.oneshot(post_req("/admin/refresh/routing")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert_eq!(state.data_plane.routing.len(), 1);
}

#[tokio::test]
async fn unknown_admin_route_is_404() {
    let (state, _guard) = make_state(Arc::new(MemoryStore::new()));
    let app = build_admin_router(state);
    let resp = app.oneshot(get_req("/admin/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
