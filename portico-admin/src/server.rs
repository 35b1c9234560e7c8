use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use portico_core::config::AdminConfig;
use portico_proxy::DataPlane;
use portico_store::StoreError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

/// Shared state for the admin listener.
///
/// The control plane proper (CRUD, auth) lives elsewhere; this surface
/// carries only what the data plane owes it: the health snapshot and the
/// three refresh signals invoked after store mutations.
pub struct AdminState {
    pub data_plane: Arc<DataPlane>,
    pub started_at: Instant,
}

/// Build the admin router.
pub fn build_admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/health", get(health_check))
        .route("/admin/refresh/routing", post(refresh_routing))
        .route("/admin/refresh/filters", post(refresh_filters))
        .route("/admin/refresh/rate-limits", post(refresh_rate_limits))
        .with_state(state)
}

/// Admin listener.
pub struct AdminServer {
    config: AdminConfig,
    state: Arc<AdminState>,
}

impl AdminServer {
    pub fn new(config: AdminConfig, data_plane: Arc<DataPlane>) -> Self {
        Self {
            config,
            state: Arc::new(AdminState {
                data_plane,
                started_at: Instant::now(),
            }),
        }
    }

    /// Serve until the shutdown signal fires.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("Admin listener disabled");
            return Ok(());
        }

        let app = build_admin_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        info!(addr = %self.config.addr, "Admin listener started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        Ok(())
    }
}

async fn health_check(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let db = match state.data_plane.store.ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };
    let backends_health = state.data_plane.health.snapshot().await;

    Json(json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "db": db,
        "backends_health": backends_health,
        "routable_hosts": state.data_plane.routing.len(),
        "active_filters": state.data_plane.filters.len(),
    }))
}

async fn refresh_routing(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .data_plane
        .refresh_routing()
        .await
        .map_err(refresh_error)?;
    Ok(Json(json!({ "status": "ok", "refreshed": "routing" })))
}

async fn refresh_filters(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .data_plane
        .refresh_filters()
        .await
        .map_err(refresh_error)?;
    Ok(Json(json!({ "status": "ok", "refreshed": "filters" })))
}

async fn refresh_rate_limits(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .data_plane
        .refresh_rate_limits()
        .await
        .map_err(refresh_error)?;
    Ok(Json(json!({ "status": "ok", "refreshed": "rate-limits" })))
}

fn refresh_error(e: StoreError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string() })),
    )
}
