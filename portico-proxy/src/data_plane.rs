use crate::filter::FilterEngine;
use crate::forward::Forwarder;
use crate::health::{HealthChecker, PROBE_INTERVAL};
use crate::limiter::RateLimiter;
use crate::routing::RoutingTable;
use crate::selector::BackendSelector;
use portico_core::config::PorticoConfig;
use portico_observability::LogSink;
use portico_store::{ConfigStore, StoreError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

const RATE_LIMIT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const ORPHAN_GC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// The data plane: every in-memory cache and transient counter a request
/// touches, threaded explicitly to the handler at construction.
///
/// The admin layer receives a handle at startup and calls the `refresh_*`
/// methods after mutating the store; all three are idempotent and safe to
/// invoke concurrently with request processing. A failed refresh preserves
/// the last good cache.
pub struct DataPlane {
    pub store: Arc<dyn ConfigStore>,
    pub routing: RoutingTable,
    pub filters: FilterEngine,
    pub limiter: RateLimiter,
    pub selector: BackendSelector,
    pub health: HealthChecker,
    pub sink: Arc<LogSink>,
    pub forwarder: Forwarder,
    refresh_interval: Duration,
}

impl DataPlane {
    pub fn new(store: Arc<dyn ConfigStore>, sink: Arc<LogSink>, config: &PorticoConfig) -> Self {
        Self {
            routing: RoutingTable::new(),
            filters: FilterEngine::new(),
            limiter: RateLimiter::new(&config.limiter),
            selector: BackendSelector::new(),
            health: HealthChecker::new(),
            forwarder: Forwarder::new(),
            refresh_interval: Duration::from_secs(config.proxy.refresh_interval_secs.max(1)),
            store,
            sink,
        }
    }

    /// Reload the host → backend cache and start a new selection epoch.
    pub async fn refresh_routing(&self) -> Result<(), StoreError> {
        self.routing.refresh(self.store.as_ref()).await?;
        self.selector.reset();
        Ok(())
    }

    /// Reload the active filter-rule list.
    pub async fn refresh_filters(&self) -> Result<(), StoreError> {
        self.filters.refresh(self.store.as_ref()).await?;
        Ok(())
    }

    /// Reload the per-host rate-limit policies.
    pub async fn refresh_rate_limits(&self) -> Result<(), StoreError> {
        self.limiter.refresh(self.store.as_ref()).await?;
        Ok(())
    }

    /// Populate every cache once at startup. Store errors are logged and
    /// tolerated — the caches stay empty until a later refresh succeeds.
    pub async fn warm_up(&self) {
        if let Err(e) = self.refresh_routing().await {
            warn!(error = %e, "Initial routing refresh failed");
        }
        if let Err(e) = self.refresh_filters().await {
            warn!(error = %e, "Initial filter refresh failed");
        }
        if let Err(e) = self.refresh_rate_limits().await {
            warn!(error = %e, "Initial rate-limit refresh failed");
        }
    }

    /// Spawn every background loop. Each observes `shutdown` and exits on
    /// the first signal.
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Routing + filter cache refresh tick. Failures keep the last good
        // view and retry next tick.
        {
            let dp = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = interval(dp.refresh_interval);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(e) = dp.refresh_routing().await {
                                error!(error = %e, "Scheduled routing refresh failed");
                            }
                            if let Err(e) = dp.refresh_filters().await {
                                error!(error = %e, "Scheduled filter refresh failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Rate-limit config refresh.
        {
            let dp = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = interval(RATE_LIMIT_REFRESH_INTERVAL);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(e) = dp.refresh_rate_limits().await {
                                error!(error = %e, "Scheduled rate-limit refresh failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Rate-limit state sweep.
        {
            let dp = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = interval(RATE_LIMIT_SWEEP_INTERVAL);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => dp.limiter.sweep(Instant::now()),
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Health probes.
        {
            let dp = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = interval(PROBE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = tick.tick() => dp.health.sweep(dp.store.as_ref()).await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Orphan-backend GC: daily, plus the immediate first tick.
        {
            let dp = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = interval(ORPHAN_GC_INTERVAL);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            match dp.store.delete_orphan_backends().await {
                                Ok(0) => {}
                                Ok(deleted) => info!(deleted, "Orphaned backends removed"),
                                Err(e) => error!(error = %e, "Orphan backend cleanup failed"),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        info!(tasks = handles.len(), "Data-plane background tasks started");
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::model::{Backend, HostRule, RateLimitPolicy};
    use portico_store::MemoryStore;

    fn rule(host: &str, backends: Vec<Backend>) -> HostRule {
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

    // The returned sender keeps the sink's flush task alive.
    fn data_plane(store: Arc<MemoryStore>) -> (Arc<DataPlane>, watch::Sender<bool>) {
        let config = PorticoConfig::default();
        let (tx, shutdown_rx) = watch::channel(false);
        let (sink, _task) = LogSink::start(store.clone(), config.sink.clone(), shutdown_rx);
        (Arc::new(DataPlane::new(store, sink, &config)), tx)
    }

    #[tokio::test]
    async fn routing_refresh_resets_selection_counters() {
        let store = Arc::new(MemoryStore::new());
        store.set_host_rules(vec![rule("api.test", vec![backend(1, "http://u1")])]);
        let (dp, _guard) = data_plane(store);

        dp.refresh_routing().await.unwrap();
        let backends = dp.routing.lookup("api.test").unwrap();
        dp.selector.select(&backends);
        dp.selector.select(&backends);
        assert_eq!(dp.selector.count_of("http://u1"), 2);

        dp.refresh_routing().await.unwrap();
        assert_eq!(dp.selector.count_of("http://u1"), 0, "new epoch");
    }

    #[tokio::test]
    async fn refresh_is_idempotent_on_an_unchanged_store() {
        let store = Arc::new(MemoryStore::new());
        store.set_host_rules(vec![rule("api.test", vec![backend(1, "http://u1")])]);
        let (dp, _guard) = data_plane(store);

        dp.refresh_routing().await.unwrap();
        let first = dp.routing.lookup("api.test").unwrap();
        dp.refresh_routing().await.unwrap();
        let second = dp.routing.lookup("api.test").unwrap();
        assert_eq!(*first, *second);
        assert_eq!(dp.routing.epoch(), 2, "epoch still advances");
    }

    #[tokio::test]
    async fn warm_up_populates_all_caches() {
        let store = Arc::new(MemoryStore::new());
        store.set_host_rules(vec![rule("api.test", vec![backend(1, "http://u1")])]);
        let (dp, _guard) = data_plane(store);

        dp.warm_up().await;
        assert!(dp.routing.lookup("api.test").is_some());
        assert!(dp.filters.is_empty());
    }

    #[tokio::test]
    async fn background_tasks_stop_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (dp, _guard) = data_plane(store);

        let (tx, rx) = watch::channel(false);
        let handles = dp.spawn_background_tasks(rx);
        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("task exits on shutdown")
                .unwrap();
        }
    }
}
