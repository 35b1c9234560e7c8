use portico_core::model::Backend;
use std::collections::HashMap;
use std::sync::Mutex;

/// Weighted fair backend selection over a shared per-URL counter map.
///
/// For each candidate, `ratio = weight / w_min` and
/// `priority = ratio − count / ratio`; the highest priority wins, with
/// ties going to the earliest candidate in list order. Every selection of
/// a backend lowers its priority by `1/ratio`, so over a long run each
/// backend is picked in proportion to its weight. Counters are keyed by
/// origin URL, grow monotonically within a routing epoch, and reset when
/// the routing cache is refreshed.
///
/// The critical section is a single read-modify-write under one mutex and
/// contains no I/O.
pub struct BackendSelector {
    counts: Mutex<HashMap<String, u64>>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Pick one backend from a non-empty candidate list and charge its
    /// counter. Returns `None` only for an empty list.
    pub fn select<'a>(&self, backends: &'a [Backend]) -> Option<&'a Backend> {
        let first = backends.first()?;
        let mut counts = self.counts.lock().unwrap();

        if backends.len() == 1 {
            *counts.entry(first.url.clone()).or_insert(0) += 1;
            return Some(first);
        }

        let w_min = backends
            .iter()
            .map(|b| b.weight.max(1))
            .min()
            .unwrap_or(1);

        let mut chosen = first;
        let mut best_priority = f64::NEG_INFINITY;
        for backend in backends {
            let ratio = backend.weight.max(1) as f64 / w_min as f64;
            let count = counts.get(backend.url.as_str()).copied().unwrap_or(0);
            let priority = ratio - count as f64 / ratio;
            if priority > best_priority {
                best_priority = priority;
                chosen = backend;
            }
        }

        *counts.entry(chosen.url.clone()).or_insert(0) += 1;
        Some(chosen)
    }

    /// Start a new epoch: forget all accumulated counts.
    pub fn reset(&self) {
        self.counts.lock().unwrap().clear();
    }

    pub fn count_of(&self, url: &str) -> u64 {
        self.counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}
