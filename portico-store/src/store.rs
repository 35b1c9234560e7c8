use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portico_core::model::{FilterLogEntry, FilterRule, HostRule, RequestLogEntry};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has been closed (or never opened). Recoverable — callers
    /// keep serving from their last good cache.
    #[error("database not initialized")]
    NotInitialized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Read/refresh interface over the persistent configuration, consumed by
/// the data plane. Tests substitute [`crate::MemoryStore`].
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All host rules with their backends joined in.
    async fn load_host_rules(&self) -> Result<Vec<HostRule>, StoreError>;

    /// Active filter rules, ordered by priority descending then id ascending.
    async fn load_filter_rules(&self) -> Result<Vec<FilterRule>, StoreError>;

    /// Persist a batch of request-log entries in one transaction.
    async fn append_request_logs(&self, batch: &[RequestLogEntry]) -> Result<(), StoreError>;

    /// Persist a single filter-log entry.
    async fn append_filter_log(&self, entry: &FilterLogEntry) -> Result<(), StoreError>;

    /// Delete request logs for `host` older than `cutoff`; returns the count.
    async fn delete_logs_older_than(
        &self,
        host: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete request logs with a null or empty host older than `cutoff`.
    async fn delete_unhosted_logs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// `(host, log_retention_days)` for every host rule.
    async fn list_hosts_with_retention(&self) -> Result<Vec<(String, u32)>, StoreError>;

    /// Delete backends referenced by no host rule; returns the count.
    async fn delete_orphan_backends(&self) -> Result<u64, StoreError>;

    /// Cheap connectivity probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
