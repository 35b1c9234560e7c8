use thiserror::Error;

/// Unified error type for the data plane.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No backends for host: {0}")]
    NoRoute(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Map to the HTTP status code the proxy emits for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::NoRoute(_) => 410,
            ProxyError::RateLimited => 429,
            ProxyError::Upstream(_) => 502,
            ProxyError::Store(_) => 503,
            _ => 500,
        }
    }
}
