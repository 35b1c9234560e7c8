use portico_core::config::SinkConfig;
use portico_core::model::{FilterLogEntry, RequestLogEntry};
use portico_store::ConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 10_000;
const MAX_FLUSH_ATTEMPTS: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One entry submitted to the sink. Request and filter records ride the
/// same channel; flushes write request batches transactionally and filter
/// entries individually.
#[derive(Debug, Clone)]
pub enum LogRecord {
    Request(RequestLogEntry),
    Filter(FilterLogEntry),
}

/// Buffered, transactional log sink.
///
/// `submit_*` is non-blocking: a full buffer drops the record with a
/// warning rather than stalling the request path. The flush task batches
/// until the configured threshold or interval, retries failed request
/// batches with exponential backoff, and drops a batch after the final
/// failed attempt (at-most-once). Shutdown drains the channel and runs one
/// final flush.
pub struct LogSink {
    tx: mpsc::Sender<LogRecord>,
}

impl LogSink {
    /// Start the sink and its background flush task.
    pub fn start(
        store: Arc<dyn ConfigStore>,
        config: SinkConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(flush_loop(store, config, rx, shutdown));
        (Arc::new(Self { tx }), handle)
    }

    pub fn submit_request(&self, entry: RequestLogEntry) {
        self.submit(LogRecord::Request(entry));
    }

    pub fn submit_filter(&self, entry: FilterLogEntry) {
        self.submit(LogRecord::Filter(entry));
    }

    fn submit(&self, record: LogRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "Log buffer full, dropping entry");
        }
    }
}

async fn flush_loop(
    store: Arc<dyn ConfigStore>,
    config: SinkConfig,
    mut rx: mpsc::Receiver<LogRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval_ms,
        "Log sink started"
    );

    let mut batch: Vec<LogRecord> = Vec::with_capacity(config.batch_size * 2);
    let mut tick = interval(config.flush_interval());
    // The first interval tick completes immediately; skip it so an empty
    // startup buffer is not flushed.
    tick.tick().await;

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= config.batch_size {
                        flush(store.as_ref(), &mut batch).await;
                    }
                }
                None => break,
            },
            _ = tick.tick() => {
                if !batch.is_empty() {
                    flush(store.as_ref(), &mut batch).await;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Final flush: drain whatever is still queued, then write once.
    while let Ok(record) = rx.try_recv() {
        batch.push(record);
    }
    flush(store.as_ref(), &mut batch).await;
    info!("Log sink stopped");
}

/// Write out the batch: request entries in one transaction (with retries),
/// filter entries one by one (failures logged, never propagated).
async fn flush(store: &dyn ConfigStore, batch: &mut Vec<LogRecord>) {
    if batch.is_empty() {
        return;
    }

    let mut requests = Vec::new();
    let mut filters = Vec::new();
    for record in batch.drain(..) {
        match record {
            LogRecord::Request(e) => requests.push(e),
            LogRecord::Filter(e) => filters.push(e),
        }
    }

    if !requests.is_empty() {
        write_request_batch(store, &requests).await;
    }
    for entry in &filters {
        if let Err(e) = store.append_filter_log(entry).await {
            error!(error = %e, filter_id = entry.filter_id, "Failed to write filter log");
        }
    }
}

async fn write_request_batch(store: &dyn ConfigStore, batch: &[RequestLogEntry]) {
    for attempt in 1..=MAX_FLUSH_ATTEMPTS {
        if attempt > 1 {
            let delay = BASE_RETRY_DELAY * 2u32.pow(attempt - 2);
            tokio::time::sleep(delay).await;
        }

        match store.append_request_logs(batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "Flushed request logs");
                return;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Request-log flush attempt failed");
            }
        }
    }

    error!(
        count = batch.len(),
        attempts = MAX_FLUSH_ATTEMPTS,
        "Dropping request-log batch after repeated flush failures"
    );
}
