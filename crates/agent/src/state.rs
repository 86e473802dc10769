//! The set of threads the agent is taking part in.

use rand::seq::IteratorRandom;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Inner {
    ids: HashSet<String>,
    last_sweep: Instant,
}

/// Thread-root ids the agent has replied into, plus the time of the last
/// cleanup sweep. Shared by the response path and the sweeper.
pub struct ActiveThreads {
    inner: Mutex<Inner>,
}

impl ActiveThreads {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ids: HashSet::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a thread. Empty ids are ignored. Returns whether it was new.
    pub fn add(&self, thread_id: &str) -> bool {
        if thread_id.is_empty() {
            return false;
        }
        self.lock().ids.insert(thread_id.to_string())
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        !thread_id.is_empty() && self.lock().ids.contains(thread_id)
    }

    pub fn remove(&self, thread_id: &str) -> bool {
        self.lock().ids.remove(thread_id)
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ids.is_empty()
    }

    /// Up to `n` tracked ids, chosen at random.
    pub fn sample(&self, n: usize) -> Vec<String> {
        let guard = self.lock();
        guard.ids.iter().cloned().choose_multiple(&mut rand::rng(), n)
    }

    /// Drop every id in `ids`; returns how many were tracked.
    pub fn evict(&self, ids: &[String]) -> usize {
        let mut guard = self.lock();
        ids.iter().filter(|id| guard.ids.remove(id.as_str())).count()
    }

    /// Claim the next sweep if `interval` has passed since the last one.
    ///
    /// Check and update happen under one lock, so concurrent callers get at
    /// most one `true` per interval.
    pub fn sweep_due(&self, now: Instant, interval: Duration) -> bool {
        let mut guard = self.lock();
        if now.saturating_duration_since(guard.last_sweep) < interval {
            return false;
        }
        guard.last_sweep = now;
        true
    }
}

impl Default for ActiveThreads {
    fn default() -> Self {
        Self::new()
    }
}
