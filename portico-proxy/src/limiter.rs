use arc_swap::ArcSwap;
use portico_core::config::LimiterConfig;
use portico_core::model::RateLimitPolicy;
use portico_store::{ConfigStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::routing::host_without_port;

/// Per-client, per-host sliding-window counter state.
struct HostWindow {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

struct ClientState {
    last_seen: Instant,
    hosts: HashMap<String, HostWindow>,
}

/// The answer for one observed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Pass,
    Limited,
}

/// Per-client, per-host rate limiter with fixed windows.
///
/// Host policies live behind an `ArcSwap` and are refreshed on a one-minute
/// tick and on demand. Counter state sits under a single mutex; the per
/// request critical section is an O(1) map walk with no I/O. A window
/// resets when the time elapsed since its start exceeds the host's period.
pub struct RateLimiter {
    policies: ArcSwap<HashMap<String, RateLimitPolicy>>,
    state: Mutex<HashMap<String, ClientState>>,
    default_quota: u32,
    default_period: Duration,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            policies: ArcSwap::new(Arc::new(HashMap::new())),
            state: Mutex::new(HashMap::new()),
            default_quota: config.default_quota,
            default_period: config.default_period(),
        }
    }

    /// Record one request from `client_ip` to `host` and decide its fate.
    pub fn check(&self, client_ip: &str, host: &str, now: Instant) -> RateDecision {
        let (quota, period) = match self.effective_policy(host) {
            Some(limits) => limits,
            // No enabled policy for this host: pass without touching state.
            None => return RateDecision::Pass,
        };

        let mut state = self.state.lock().unwrap();
        let client = state.entry(client_ip.to_string()).or_insert_with(|| ClientState {
            last_seen: now,
            hosts: HashMap::new(),
        });
        client.last_seen = now;

        let window = client.hosts.entry(host.to_string()).or_insert_with(|| HostWindow {
            count: 0,
            window_start: now,
            last_seen: now,
        });
        window.last_seen = now;

        if now.duration_since(window.window_start) > period {
            window.count = 1;
            window.window_start = now;
            return RateDecision::Pass;
        }

        window.count += 1;
        if window.count > quota {
            RateDecision::Limited
        } else {
            RateDecision::Pass
        }
    }

    /// `(quota, period)` when the host has an enabled policy, else `None`.
    fn effective_policy(&self, host: &str) -> Option<(u32, Duration)> {
        let policies = self.policies.load();
        let policy = policies
            .get(host)
            .or_else(|| policies.get(host_without_port(host)))?;
        if !policy.enabled {
            return None;
        }

        let quota = if policy.quota == 0 {
            self.default_quota
        } else {
            policy.quota
        };
        let period = if policy.period_secs == 0 {
            self.default_period
        } else {
            Duration::from_secs(policy.period_secs)
        };
        Some((quota, period))
    }

    /// Reload the per-host policy map from the store.
    pub async fn refresh(&self, store: &dyn ConfigStore) -> Result<usize, StoreError> {
        let rules = store.load_host_rules().await?;
        let mut next = HashMap::with_capacity(rules.len());
        for rule in rules {
            next.insert(rule.host, rule.rate_limit);
        }
        let count = next.len();
        self.policies.store(Arc::new(next));
        info!(hosts = count, "Rate-limit configs refreshed");
        Ok(count)
    }

    /// Evict idle counter state: clients unseen for 3× the default period,
    /// and per-host windows unseen for 3× that host's period.
    pub fn sweep(&self, now: Instant) {
        let policies = self.policies.load();
        let mut state = self.state.lock().unwrap();
        let before = state.len();

        state.retain(|_, client| {
            if now.duration_since(client.last_seen) > 3 * self.default_period {
                return false;
            }
            client.hosts.retain(|host, window| {
                let period = policies
                    .get(host.as_str())
                    .filter(|p| p.enabled && p.period_secs > 0)
                    .map(|p| Duration::from_secs(p.period_secs))
                    .unwrap_or(self.default_period);
                now.duration_since(window.last_seen) <= 3 * period
            });
            true
        });

        let evicted = before - state.len();
        if evicted > 0 {
            debug!(evicted, "Rate-limit state swept");
        }
    }

    /// Drop all counter state. Durable configuration is unaffected.
    pub fn clear(&self) {
        self.state.lock().unwrap().clear();
    }

    pub fn tracked_clients(&self) -> usize {
        self.state.lock().unwrap().len()
    }
}
