pub mod config;
pub mod error;
pub mod model;

pub use config::PorticoConfig;
pub use error::ProxyError;
pub use model::{
    ActionKind, Backend, FilterLogEntry, FilterRule, HostRule, MatchKind, RateLimitPolicy,
    RequestLogEntry,
};
