use arc_swap::ArcSwap;
use portico_core::model::Backend;
use portico_store::{ConfigStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Host → eligible backends, answered in O(1) without locking.
///
/// The live map sits behind an `ArcSwap`: readers do one atomic load per
/// request, refreshers build a complete replacement off to the side and
/// swap it in. Concurrent readers see either the pre- or post-refresh
/// view, never a blend. Refreshers serialize on a mutex so two concurrent
/// refresh calls cannot interleave their loads and swaps.
pub struct RoutingTable {
    table: ArcSwap<HashMap<String, Arc<Vec<Backend>>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped on every successful refresh; selection counters reset per epoch.
    epoch: AtomicU64,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::new(Arc::new(HashMap::new())),
            refresh_lock: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Candidate backends for `host`. Tries the Host header value as
    /// written, then with any port stripped, so rules stored either way
    /// resolve. Hosts with no active backends are absent from the table.
    pub fn lookup(&self, host: &str) -> Option<Arc<Vec<Backend>>> {
        let table = self.table.load();
        if let Some(backends) = table.get(host) {
            return Some(Arc::clone(backends));
        }
        let stripped = host_without_port(host);
        if stripped != host {
            return table.get(stripped).map(Arc::clone);
        }
        None
    }

    /// Rebuild the table from the store and swap it in atomically.
    ///
    /// On store error the live table is preserved; the caller logs and the
    /// next tick retries. Returns the number of routable hosts.
    pub async fn refresh(&self, store: &dyn ConfigStore) -> Result<usize, StoreError> {
        let _guard = self.refresh_lock.lock().await;

        let rules = store.load_host_rules().await?;
        let mut next: HashMap<String, Arc<Vec<Backend>>> = HashMap::with_capacity(rules.len());
        for rule in rules {
            let active: Vec<Backend> = rule.backends.into_iter().filter(|b| b.active).collect();
            if !active.is_empty() {
                next.insert(rule.host, Arc::new(active));
            }
        }

        let hosts = next.len();
        self.table.store(Arc::new(next));
        self.epoch.fetch_add(1, Ordering::Relaxed);
        info!(hosts, epoch = self.epoch(), "Routing cache refreshed");
        Ok(hosts)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a trailing `:port` from a Host value, leaving IPv6 literals like
/// `[::1]` intact.
pub(crate) fn host_without_port(host: &str) -> &str {
    if let Some(stripped) = host.strip_prefix('[') {
        // Bracketed IPv6: keep everything up to the closing bracket.
        if let Some(end) = stripped.find(']') {
            return &host[..end + 2];
        }
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
