use chrono::{Duration as ChronoDuration, Utc};
use portico_store::ConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention applied to hosts whose rule has no explicit value, and to log
/// rows with no host at all.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Prunes request logs per-host on a daily cadence.
pub struct RetentionSweeper;

impl RetentionSweeper {
    /// Run once immediately, then every 24 hours until shutdown.
    pub async fn run(store: Arc<dyn ConfigStore>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                // The first tick completes immediately: the startup sweep.
                _ = tick.tick() => Self::sweep(store.as_ref()).await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One full pass: per-host retention, then the no-host fallback.
    pub async fn sweep(store: &dyn ConfigStore) {
        let hosts = match store.list_hosts_with_retention().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!(error = %e, "Failed to list hosts for log retention");
                return;
            }
        };

        let mut total_pruned: u64 = 0;
        let now = Utc::now();

        for (host, retention_days) in hosts {
            let days = if retention_days == 0 {
                DEFAULT_RETENTION_DAYS
            } else {
                retention_days
            };
            let cutoff = now - ChronoDuration::days(days as i64);

            match store.delete_logs_older_than(&host, cutoff).await {
                Ok(0) => {}
                Ok(pruned) => {
                    total_pruned += pruned;
                    info!(host = %host, pruned, retention_days = days, "Pruned request logs");
                }
                Err(e) => {
                    error!(host = %host, error = %e, "Failed to prune request logs");
                }
            }
        }

        let default_cutoff = now - ChronoDuration::days(DEFAULT_RETENTION_DAYS as i64);
        match store.delete_unhosted_logs_older_than(default_cutoff).await {
            Ok(pruned) => total_pruned += pruned,
            Err(e) => error!(error = %e, "Failed to prune no-host request logs"),
        }

        info!(total_pruned, "Log retention sweep completed");
    }
}
