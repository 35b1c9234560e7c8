use portico_store::ConfigStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks backend health by origin URL.
///
/// Probed set: every active backend referenced by at least one host rule
/// with health checks enabled. A backend is healthy iff its probe returned
/// a status in [200, 500); transport errors and timeouts mark it
/// unhealthy. Entries for URLs that left the probed set are evicted each
/// sweep. Health is informational — selection consults the `active` flag
/// only.
pub struct HealthChecker {
    statuses: Arc<RwLock<HashMap<String, bool>>>,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
            client: reqwest::Client::new(),
        }
    }

    /// One probe pass over every backend currently opted in.
    pub async fn sweep(&self, store: &dyn ConfigStore) {
        let rules = match store.load_host_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "Failed to load host rules for health checks");
                return;
            }
        };

        let mut urls: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for rule in rules {
            if !rule.health_check_enabled {
                continue;
            }
            for backend in rule.backends {
                if backend.active && seen.insert(backend.url.clone()) {
                    urls.push(backend.url);
                }
            }
        }

        // Evict URLs that no longer need monitoring.
        {
            let mut statuses = self.statuses.write().await;
            statuses.retain(|url, _| seen.contains(url));
        }

        let mut probes = JoinSet::new();
        for url in urls {
            let client = self.client.clone();
            probes.spawn(async move {
                let healthy = probe(&client, &url).await;
                (url, healthy)
            });
        }

        while let Some(result) = probes.join_next().await {
            if let Ok((url, healthy)) = result {
                debug!(url = %url, healthy, "Health probe completed");
                self.statuses.write().await.insert(url, healthy);
            }
        }
    }

    /// Last probe result for a backend URL. Unprobed backends count as
    /// healthy.
    pub async fn is_healthy(&self, url: &str) -> bool {
        *self.statuses.read().await.get(url).unwrap_or(&true)
    }

    /// Snapshot of the whole status map, for the health endpoint.
    pub async fn snapshot(&self) -> HashMap<String, bool> {
        self.statuses.read().await.clone()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            (200..500).contains(&status)
        }
        Err(_) => false,
    }
}
