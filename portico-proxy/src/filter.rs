use arc_swap::ArcSwap;
use ipnet::IpNet;
use portico_core::model::{FilterRule, MatchKind};
use portico_store::{ConfigStore, StoreError};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of evaluating the filter rules against one request.
#[derive(Debug, Clone)]
pub enum Decision {
    Pass,
    Filtered {
        rule: FilterRule,
        status: u16,
        body: String,
        redirect_url: Option<String>,
    },
}

/// Priority-ordered filter evaluation over an atomically swapped rule list.
///
/// The list is stored pre-sorted (priority descending, id ascending — the
/// store's query order); evaluation walks it in order and the first match
/// wins. An evaluation in flight at the moment of a refresh completes
/// against the snapshot it captured.
pub struct FilterEngine {
    rules: ArcSwap<Vec<FilterRule>>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Evaluate the current rule list against a request's client IP, Host
    /// header, and path.
    pub fn evaluate(&self, client_ip: &str, host: &str, path: &str) -> Decision {
        let rules = self.rules.load();
        for rule in rules.iter() {
            if matches_rule(rule, client_ip, host, path) {
                return Decision::Filtered {
                    status: rule.action_status(),
                    body: rule.action_body().to_string(),
                    redirect_url: rule.redirect_url().map(str::to_string),
                    rule: rule.clone(),
                };
            }
        }
        Decision::Pass
    }

    /// Reload active rules from the store and swap the list atomically.
    /// On store error the current list is preserved.
    pub async fn refresh(&self, store: &dyn ConfigStore) -> Result<usize, StoreError> {
        let rules = store.load_filter_rules().await?;
        let count = rules.len();
        self.rules.store(Arc::new(rules));
        info!(rules = count, "Filter cache refreshed");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_rule(rule: &FilterRule, client_ip: &str, host: &str, path: &str) -> bool {
    match rule.match_kind {
        MatchKind::ClientIp => matches_ip(&rule.match_value, client_ip),
        MatchKind::Path => matches_path(&rule.match_value, path),
        MatchKind::Host => matches_host(&rule.match_value, host),
    }
}

/// Client-IP pattern: CIDR block, wildcard, or substring.
fn matches_ip(pattern: &str, client_ip: &str) -> bool {
    if pattern.contains('/') {
        let net: IpNet = match pattern.parse() {
            Ok(net) => net,
            Err(_) => {
                warn!(pattern = %pattern, "Invalid CIDR pattern in filter rule");
                return false;
            }
        };
        let ip: IpAddr = match client_ip.parse() {
            Ok(ip) => ip,
            Err(_) => return false,
        };
        return net.contains(&ip);
    }

    if pattern.contains('*') {
        return matches_wildcard(pattern, client_ip);
    }

    client_ip.contains(pattern)
}

/// Path pattern: wildcard, trailing-slash prefix, or substring.
fn matches_path(pattern: &str, path: &str) -> bool {
    if pattern.contains('*') {
        return matches_wildcard(pattern, path);
    }
    if pattern.ends_with('/') {
        return path.starts_with(pattern);
    }
    path.contains(pattern)
}

/// Host pattern: wildcard or substring.
fn matches_host(pattern: &str, host: &str) -> bool {
    if pattern.contains('*') {
        return matches_wildcard(pattern, host);
    }
    host.contains(pattern)
}

/// `*` alone matches everything; `*x*`, `*x`, `x*` match contains, suffix,
/// and prefix. Any other wildcard shape falls back to exact equality.
fn matches_wildcard(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let leading = pattern.starts_with('*');
    let trailing = pattern.ends_with('*');
    if leading && trailing {
        return text.contains(&pattern[1..pattern.len() - 1]);
    }
    if leading {
        return text.ends_with(&pattern[1..]);
    }
    if trailing {
        return text.starts_with(&pattern[..pattern.len() - 1]);
    }

    pattern == text
}
