use crate::store::{ConfigStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portico_core::model::{
    ActionKind, Backend, FilterLogEntry, FilterRule, HostRule, MatchKind, RateLimitPolicy,
    RequestLogEntry,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration store backed by SQLite.
///
/// Pool and pragma tuning follows what a write-light, read-mostly proxy
/// store needs: WAL journaling so log-batch writers do not block config
/// readers, `synchronous=NORMAL`, and a 5 s busy timeout.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Row shapes are kept separate from the domain types so schema details
/// (column names, integer booleans) stay localized here.
#[derive(Debug, FromRow)]
struct HostRuleRow {
    id: i64,
    host: String,
    rate_limit_enabled: bool,
    rate_limit_quota: i64,
    rate_limit_period: i64,
    log_retention_days: i64,
    health_check_enabled: bool,
}

#[derive(Debug, FromRow)]
struct BackendRow {
    id: i64,
    url: String,
    weight: i64,
    active: bool,
}

#[derive(Debug, FromRow)]
struct FilterRuleRow {
    id: i64,
    name: String,
    match_kind: String,
    match_value: String,
    action_kind: String,
    action_value: String,
    status_code: i64,
    active: bool,
    priority: i64,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`, apply pragmas,
    /// and run embedded migrations.
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("temp_store", "memory")
            .pragma("cache_size", "1000");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(path = %path.display(), max_connections, "SQLite store ready");
        Ok(Self { pool })
    }

    /// An in-memory store for tests and ephemeral runs. Single connection,
    /// since every in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Direct pool access for the admin layer (out of scope here) and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn guard_open(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn load_host_rules(&self) -> Result<Vec<HostRule>, StoreError> {
        self.guard_open()?;

        let rule_rows = sqlx::query_as::<_, HostRuleRow>(
            "SELECT id, host, rate_limit_enabled, rate_limit_quota, rate_limit_period, \
             log_retention_days, health_check_enabled FROM host_rules",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rule_rows.len());
        for row in rule_rows {
            let backend_rows = sqlx::query_as::<_, BackendRow>(
                "SELECT b.id, b.url, b.weight, b.active FROM backends b \
                 JOIN host_backend_map m ON b.id = m.backend_id \
                 WHERE m.host_rule_id = ?1 ORDER BY b.id",
            )
            .bind(row.id)
            .fetch_all(&self.pool)
            .await?;

            rules.push(HostRule {
                id: row.id,
                host: row.host,
                rate_limit: RateLimitPolicy {
                    enabled: row.rate_limit_enabled,
                    quota: row.rate_limit_quota.max(0) as u32,
                    period_secs: row.rate_limit_period.max(0) as u64,
                },
                log_retention_days: row.log_retention_days.max(0) as u32,
                health_check_enabled: row.health_check_enabled,
                backends: backend_rows
                    .into_iter()
                    .map(|b| Backend {
                        id: b.id,
                        url: b.url,
                        weight: b.weight.max(0) as u32,
                        active: b.active,
                    })
                    .collect(),
            });
        }

        Ok(rules)
    }

    async fn load_filter_rules(&self) -> Result<Vec<FilterRule>, StoreError> {
        self.guard_open()?;

        let rows = sqlx::query_as::<_, FilterRuleRow>(
            "SELECT id, name, match_kind, match_value, action_kind, action_value, \
             status_code, active, priority FROM filter_rules \
             WHERE active = 1 ORDER BY priority DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let rules = rows
            .into_iter()
            .filter_map(|row| {
                let match_kind = MatchKind::parse(&row.match_kind);
                let action_kind = ActionKind::parse(&row.action_kind);
                match (match_kind, action_kind) {
                    (Some(match_kind), Some(action_kind)) => Some(FilterRule {
                        id: row.id,
                        name: row.name,
                        match_kind,
                        match_value: row.match_value,
                        action_kind,
                        action_value: row.action_value,
                        status_code: row.status_code.clamp(0, u16::MAX as i64) as u16,
                        active: row.active,
                        priority: row.priority as i32,
                    }),
                    _ => {
                        warn!(
                            rule_id = row.id,
                            match_kind = %row.match_kind,
                            action_kind = %row.action_kind,
                            "Skipping filter rule with unknown kind"
                        );
                        None
                    }
                }
            })
            .collect();

        Ok(rules)
    }

    async fn append_request_logs(&self, batch: &[RequestLogEntry]) -> Result<(), StoreError> {
        self.guard_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in batch {
            sqlx::query(
                "INSERT INTO request_logs (timestamp, client_ip, host, path, backend_id, \
                 latency_ms, status_code, is_success, user_agent, filter_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(entry.timestamp)
            .bind(&entry.client_ip)
            .bind(&entry.host)
            .bind(&entry.path)
            .bind(entry.backend_id)
            .bind(entry.latency_ms)
            .bind(entry.status_code as i64)
            .bind(entry.is_success)
            .bind(&entry.user_agent)
            .bind(entry.filter_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_filter_log(&self, entry: &FilterLogEntry) -> Result<(), StoreError> {
        self.guard_open()?;

        sqlx::query(
            "INSERT INTO filter_logs (timestamp, client_ip, host, path, user_agent, \
             filter_id, match_kind, match_value, action_kind, status_code) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(entry.timestamp)
        .bind(&entry.client_ip)
        .bind(&entry.host)
        .bind(&entry.path)
        .bind(&entry.user_agent)
        .bind(entry.filter_id)
        .bind(entry.match_kind.as_str())
        .bind(&entry.match_value)
        .bind(entry.action_kind.as_str())
        .bind(entry.status_code as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_logs_older_than(
        &self,
        host: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.guard_open()?;

        let result = sqlx::query("DELETE FROM request_logs WHERE host = ?1 AND timestamp < ?2")
            .bind(host)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_unhosted_logs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.guard_open()?;

        let result = sqlx::query(
            "DELETE FROM request_logs WHERE (host IS NULL OR host = '') AND timestamp < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_hosts_with_retention(&self) -> Result<Vec<(String, u32)>, StoreError> {
        self.guard_open()?;

        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT host, log_retention_days FROM host_rules",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(host, days)| (host, days.max(0) as u32))
            .collect())
    }

    async fn delete_orphan_backends(&self) -> Result<u64, StoreError> {
        self.guard_open()?;

        let result = sqlx::query(
            "DELETE FROM backends WHERE id NOT IN (SELECT backend_id FROM host_backend_map)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.guard_open()?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
