use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A concrete origin URL eligible to serve requests for one or more host rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: i64,
    pub url: String,
    pub weight: u32,
    pub active: bool,
}

/// Per-host rate-limit policy. `quota` requests per `period_secs` per client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub quota: u32,
    pub period_secs: u64,
}

/// A mapping from a request Host header to its backends, plus per-host policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRule {
    pub id: i64,
    pub host: String,
    pub rate_limit: RateLimitPolicy,
    /// Days to keep request logs for this host. 0 means the process default.
    pub log_retention_days: u32,
    pub health_check_enabled: bool,
    pub backends: Vec<Backend>,
}

/// What request field a filter rule matches against.
///
/// The wire/store names are the short forms the configuration store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    #[serde(rename = "ip")]
    ClientIp,
    #[serde(rename = "path")]
    Path,
    #[serde(rename = "dns")]
    Host,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::ClientIp => "ip",
            MatchKind::Path => "path",
            MatchKind::Host => "dns",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ip" => Some(MatchKind::ClientIp),
            "path" => Some(MatchKind::Path),
            "dns" => Some(MatchKind::Host),
            _ => None,
        }
    }
}

/// What a matched filter rule does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Redirect,
    BadRequest,
    TooMany,
    Custom,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Redirect => "redirect",
            ActionKind::BadRequest => "bad_request",
            ActionKind::TooMany => "too_many",
            ActionKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "redirect" => Some(ActionKind::Redirect),
            "bad_request" => Some(ActionKind::BadRequest),
            "too_many" => Some(ActionKind::TooMany),
            "custom" => Some(ActionKind::Custom),
            _ => None,
        }
    }
}

/// A predicate-plus-action record that short-circuits request handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: i64,
    pub name: String,
    pub match_kind: MatchKind,
    pub match_value: String,
    pub action_kind: ActionKind,
    pub action_value: String,
    /// Only consulted for `ActionKind::Custom`; 0 falls back to 403.
    pub status_code: u16,
    pub active: bool,
    pub priority: i32,
}

impl FilterRule {
    /// The HTTP status this rule's action produces.
    pub fn action_status(&self) -> u16 {
        match self.action_kind {
            ActionKind::Redirect => 302,
            ActionKind::BadRequest => 400,
            ActionKind::TooMany => 429,
            ActionKind::Custom => {
                if self.status_code > 0 {
                    self.status_code
                } else {
                    403
                }
            }
        }
    }

    /// The response body for this rule's action. Empty for redirects.
    pub fn action_body(&self) -> &str {
        let default = match self.action_kind {
            ActionKind::Redirect => return "",
            ActionKind::BadRequest => "Bad Request",
            ActionKind::TooMany => "Too Many Requests",
            ActionKind::Custom => "Request Blocked",
        };
        if self.action_value.is_empty() {
            default
        } else {
            &self.action_value
        }
    }

    /// The redirect target, for redirect actions only.
    pub fn redirect_url(&self) -> Option<&str> {
        match self.action_kind {
            ActionKind::Redirect => Some(&self.action_value),
            _ => None,
        }
    }
}

/// One observed request outcome, batched and persisted by the log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub host: String,
    pub path: String,
    /// 0 when no backend was selected (no route, rate limited).
    pub backend_id: i64,
    pub latency_ms: i64,
    pub status_code: u16,
    pub is_success: bool,
    pub user_agent: String,
    /// 0 when the request was not filtered.
    pub filter_id: i64,
}

/// One filtered-request record, persisted through the same sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterLogEntry {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub host: String,
    pub path: String,
    pub user_agent: String,
    pub filter_id: i64,
    pub match_kind: MatchKind,
    pub match_value: String,
    pub action_kind: ActionKind,
    pub status_code: u16,
}
