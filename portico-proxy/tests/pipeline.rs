//! End-to-end data-plane tests: a real proxy listener forwarding to real
//! (ephemeral) upstreams, with an in-memory config store behind it.
//!
//! Covered scenarios: happy-path forward with its request-log row, filter
//! redirect (no upstream call, no request log), unknown host → 410,
//! refused upstream → 502, and the per-host rate-limit trip.

use portico_core::config::{PorticoConfig, SinkConfig};
use portico_core::model::{
    ActionKind, Backend, FilterRule, HostRule, MatchKind, RateLimitPolicy,
};
use portico_observability::LogSink;
use portico_proxy::pipeline::proxy_router;
use portico_proxy::DataPlane;
use portico_store::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ── Helpers ──────────────────────────────────────────────────────────────────

struct TestPlane {
    store: Arc<MemoryStore>,
    dp: Arc<DataPlane>,
    proxy_url: String,
    // Keeps the sink's flush task alive for the duration of the test.
    _shutdown_tx: watch::Sender<bool>,
}

async fn test_plane() -> TestPlane {
    let store = Arc::new(MemoryStore::new());
    let config = PorticoConfig::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Batch size 1 so every outcome is visible to assertions immediately.
    let sink_config = SinkConfig {
        batch_size: 1,
        flush_interval_ms: 50,
    };
    let (sink, _task) = LogSink::start(store.clone(), sink_config, shutdown_rx);
    let dp = Arc::new(DataPlane::new(store.clone(), sink, &config));

    let app = proxy_router(Arc::clone(&dp));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestPlane {
        store,
        dp,
        proxy_url: format!("http://{addr}"),
        _shutdown_tx: shutdown_tx,
    }
}

async fn spawn_upstream(status: u16, body: &'static str) -> String {
    use axum::http::StatusCode;

    let app = axum::Router::new().fallback(move || async move {
        (StatusCode::from_u16(status).unwrap(), body)
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A loopback address that refuses connections.
async fn dead_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

fn host_rule(host: &str, backends: Vec<Backend>) -> HostRule {
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
        backends,
    }
}

fn backend(id: i64, url: &str) -> Backend {
    Backend {
        id,
        url: url.into(),
        weight: 1,
        active: true,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

async fn wait_for_request_logs(store: &MemoryStore, count: usize) {
    for _ in 0..100 {
        if store.request_logs().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {count} request logs, got {}",
        store.request_logs().len()
    );
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_forwards_and_logs_one_row() {
    let plane = test_plane().await;
    let upstream = spawn_upstream(200, "ok").await;
    plane
        .store
        .set_host_rules(vec![host_rule("api.test", vec![backend(7, &upstream)])]);
    plane.dp.warm_up().await;

    let resp = client()
        .get(format!("{}/ping", plane.proxy_url))
        .header("Host", "api.test")
        .header("X-Forwarded-For", "192.0.2.5")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    wait_for_request_logs(&plane.store, 1).await;
    let logs = plane.store.request_logs();
    assert_eq!(logs.len(), 1);
    let row = &logs[0];
    assert_eq!(row.host, "api.test");
    assert_eq!(row.path, "/ping");
    assert_eq!(row.backend_id, 7);
    assert_eq!(row.status_code, 200);
    assert!(row.is_success);
    assert_eq!(row.client_ip, "192.0.2.5");
    assert_eq!(row.filter_id, 0);
}

// ── Filter redirect ──────────────────────────────────────────────────────────

#[tokio::test]
async fn filter_redirect_short_circuits_without_upstream_call() {
    let plane = test_plane().await;
    // Upstream that would fail the test if ever reached.
    let upstream = spawn_upstream(500, "must not be called").await;
    plane
        .store
        .set_host_rules(vec![host_rule("api.test", vec![backend(1, &upstream)])]);
    plane.store.set_filter_rules(vec![FilterRule {
        id: 42,
        name: "legacy-redirect".into(),
        match_kind: MatchKind::Path,
        match_value: "/legacy*".into(),
        action_kind: ActionKind::Redirect,
        action_value: "https://new.example/legacy".into(),
        status_code: 0,
        active: true,
        priority: 10,
    }]);
    plane.dp.warm_up().await;

    let resp = client()
        .get(format!("{}/legacy/a", plane.proxy_url))
        .header("Host", "api.test")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 302);
    assert_eq!(
        resp.headers().get("location").unwrap(),
        "https://new.example/legacy"
    );

    // One filter-log row, no request-log row.
    for _ in 0..100 {
        if !plane.store.filter_logs().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let filter_logs = plane.store.filter_logs();
    assert_eq!(filter_logs.len(), 1);
    assert_eq!(filter_logs[0].filter_id, 42);
    assert_eq!(filter_logs[0].status_code, 302);
    assert!(plane.store.request_logs().is_empty());
}

// ── Unknown host ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_host_is_410_with_log_row() {
    let plane = test_plane().await;
    plane.dp.warm_up().await;

    let resp = client()
        .get(format!("{}/x", plane.proxy_url))
        .header("Host", "nope.test")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 410);
    assert!(resp.text().await.unwrap().contains("nope.test"));

    wait_for_request_logs(&plane.store, 1).await;
    let logs = plane.store.request_logs();
    assert_eq!(logs[0].host, "nope.test");
    assert_eq!(logs[0].backend_id, 0);
    assert_eq!(logs[0].status_code, 410);
    assert!(!logs[0].is_success);
}

// ── Upstream down ────────────────────────────────────────────────────────────

#[tokio::test]
async fn refused_upstream_is_502_with_log_row() {
    let plane = test_plane().await;
    let upstream = dead_upstream().await;
    plane
        .store
        .set_host_rules(vec![host_rule("api.test", vec![backend(3, &upstream)])]);
    plane.dp.warm_up().await;

    let resp = client()
        .get(format!("{}/x", plane.proxy_url))
        .header("Host", "api.test")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);

    wait_for_request_logs(&plane.store, 1).await;
    let logs = plane.store.request_logs();
    assert_eq!(logs[0].backend_id, 3);
    assert_eq!(logs[0].status_code, 502);
    assert!(!logs[0].is_success);
}

// ── Rate limit trip ──────────────────────────────────────────────────────────

#[tokio::test]
async fn sixth_request_in_window_is_rate_limited() {
    let plane = test_plane().await;
    let upstream = spawn_upstream(200, "ok").await;
    let mut rule = host_rule("api.test", vec![backend(1, &upstream)]);
    rule.rate_limit = RateLimitPolicy {
        enabled: true,
        quota: 5,
        period_secs: 60,
    };
    plane.store.set_host_rules(vec![rule]);
    plane.dp.warm_up().await;

    let http = client();
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let resp = http
            .get(format!("{}/burst", plane.proxy_url))
            .header("Host", "api.test")
            .header("X-Forwarded-For", "198.51.100.7")
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }

    assert_eq!(statuses[..5], [200, 200, 200, 200, 200]);
    assert_eq!(statuses[5], 429);

    wait_for_request_logs(&plane.store, 6).await;
    let logs = plane.store.request_logs();
    assert_eq!(logs.len(), 6);
    assert_eq!(logs.iter().filter(|r| r.status_code == 200).count(), 5);
    let limited: Vec<_> = logs.iter().filter(|r| r.status_code == 429).collect();
    assert_eq!(limited.len(), 1);
    assert!(!limited[0].is_success);
}

// ── Method, query, and body passthrough ──────────────────────────────────────

#[tokio::test]
async fn post_bodies_and_queries_reach_the_upstream() {
    use axum::extract::RawQuery;

    let plane = test_plane().await;

    // Echo upstream: method, query, and body in the response.
    let app = axum::Router::new().fallback(
        move |method: axum::http::Method, RawQuery(query): RawQuery, body: String| async move {
            format!("{} {} {}", method, query.unwrap_or_default(), body)
        },
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    plane
        .store
        .set_host_rules(vec![host_rule("api.test", vec![backend(1, &upstream)])]);
    plane.dp.warm_up().await;

    let resp = client()
        .post(format!("{}/submit?page=2", plane.proxy_url))
        .header("Host", "api.test")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "POST page=2 payload");
}
