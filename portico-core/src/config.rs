use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the Portico proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PorticoConfig {
    /// Proxy (data-plane) listener configuration
    #[serde(default)]
    pub proxy: ProxyListenerConfig,

    /// Admin listener configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Configuration store
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Buffered log sink
    #[serde(default)]
    pub sink: SinkConfig,

    /// Rate-limiter process defaults
    #[serde(default)]
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyListenerConfig {
    /// Proxy listener address
    #[serde(default = "default_proxy_addr")]
    pub http_addr: SocketAddr,

    /// Cache refresh tick (routing table + filter rules), seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin listener address
    #[serde(default = "default_admin_addr")]
    pub addr: SocketAddr,

    /// Enable the admin listener
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Flush when the buffer reaches this many entries
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush at least this often regardless of buffer length
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl SinkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Quota applied when a host's stored quota is zero
    #[serde(default = "default_quota")]
    pub default_quota: u32,

    /// Period applied when a host's stored period is zero, seconds
    #[serde(default = "default_period")]
    pub default_period_secs: u64,
}

impl LimiterConfig {
    pub fn default_period(&self) -> Duration {
        Duration::from_secs(self.default_period_secs)
    }
}

impl PorticoConfig {
    /// Load configuration from a YAML file plus `PORTICO_`-prefixed
    /// environment variables, then apply the legacy variable overrides
    /// (`PROXY_PORT`, `ADMIN_PORT`, `LOG_BATCH_SIZE`, `LOG_FLUSH_TIME`).
    pub fn load(config_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["portico.yaml", "/etc/portico/portico.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("PORTICO_").split("__"));

        let mut config: Self = figment.extract()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the environment variables the original deployment recognizes.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parsed::<u16>("PROXY_PORT") {
            self.proxy.http_addr.set_port(port);
        }
        if let Some(port) = env_parsed::<u16>("ADMIN_PORT") {
            self.admin.addr.set_port(port);
        }
        if let Some(size) = env_parsed::<usize>("LOG_BATCH_SIZE") {
            self.sink.batch_size = size;
        }
        if let Ok(raw) = std::env::var("LOG_FLUSH_TIME") {
            if let Some(d) = parse_duration(&raw) {
                self.sink.flush_interval_ms = d.as_millis() as u64;
            }
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Parse a duration string: `500ms`, `5s`, `2m`, `1h`, or a bare number
/// of seconds. Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(num) = s.strip_suffix("ms") {
        return num.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(num) = s.strip_suffix('s') {
        return num.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(num) = s.strip_suffix('m') {
        return num.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    if let Some(num) = s.strip_suffix('h') {
        return num.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600));
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

// Default implementations

impl Default for PorticoConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyListenerConfig::default(),
            admin: AdminConfig::default(),
            database: DatabaseConfig::default(),
            sink: SinkConfig::default(),
            limiter: LimiterConfig::default(),
        }
    }
}

impl Default for ProxyListenerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_proxy_addr(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
            enabled: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_quota: default_quota(),
            default_period_secs: default_period(),
        }
    }
}

// Serde default functions

fn default_proxy_addr() -> SocketAddr {
    "0.0.0.0:9080".parse().unwrap()
}

fn default_admin_addr() -> SocketAddr {
    "127.0.0.1:9180".parse().unwrap()
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/portico.db")
}

fn default_max_connections() -> u32 {
    25
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_quota() -> u32 {
    100
}

fn default_period() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
