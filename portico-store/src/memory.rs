use crate::store::{ConfigStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portico_core::model::{FilterLogEntry, FilterRule, HostRule, RequestLogEntry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory [`ConfigStore`] for tests and ephemeral runs.
///
/// Holds host and filter rules set by the caller and accumulates appended
/// log entries. `fail_appends` makes every append return
/// [`StoreError::NotInitialized`], for exercising sink retry/drop paths.
#[derive(Default)]
pub struct MemoryStore {
    host_rules: Mutex<Vec<HostRule>>,
    filter_rules: Mutex<Vec<FilterRule>>,
    request_logs: Mutex<Vec<RequestLogEntry>>,
    filter_logs: Mutex<Vec<FilterLogEntry>>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host_rules(&self, rules: Vec<HostRule>) {
        *self.host_rules.lock().unwrap() = rules;
    }

    pub fn set_filter_rules(&self, rules: Vec<FilterRule>) {
        *self.filter_rules.lock().unwrap() = rules;
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }

    pub fn request_logs(&self) -> Vec<RequestLogEntry> {
        self.request_logs.lock().unwrap().clone()
    }

    pub fn filter_logs(&self) -> Vec<FilterLogEntry> {
        self.filter_logs.lock().unwrap().clone()
    }

    pub fn seed_request_logs(&self, entries: Vec<RequestLogEntry>) {
        self.request_logs.lock().unwrap().extend(entries);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_host_rules(&self) -> Result<Vec<HostRule>, StoreError> {
        Ok(self.host_rules.lock().unwrap().clone())
    }

    async fn load_filter_rules(&self) -> Result<Vec<FilterRule>, StoreError> {
        // Mirror the SQL contract: active only, priority desc, id asc.
        let mut rules: Vec<FilterRule> = self
            .filter_rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn append_request_logs(&self, batch: &[RequestLogEntry]) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(StoreError::NotInitialized);
        }
        self.request_logs.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }

    async fn append_filter_log(&self, entry: &FilterLogEntry) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(StoreError::NotInitialized);
        }
        self.filter_logs.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn delete_logs_older_than(
        &self,
        host: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut logs = self.request_logs.lock().unwrap();
        let before = logs.len();
        logs.retain(|e| !(e.host == host && e.timestamp < cutoff));
        Ok((before - logs.len()) as u64)
    }

    async fn delete_unhosted_logs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut logs = self.request_logs.lock().unwrap();
        let before = logs.len();
        logs.retain(|e| !(e.host.is_empty() && e.timestamp < cutoff));
        Ok((before - logs.len()) as u64)
    }

    async fn list_hosts_with_retention(&self) -> Result<Vec<(String, u32)>, StoreError> {
        Ok(self
            .host_rules
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.host.clone(), r.log_retention_days))
            .collect())
    }

    async fn delete_orphan_backends(&self) -> Result<u64, StoreError> {
        // Host rules own their backends here; nothing can be orphaned.
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
