//! Bounded cleanup of threads that no longer exist.

use crate::state::ActiveThreads;
use huddle_core::channel::ChatPlatform;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sampled: usize,
    pub evicted: usize,
}

/// Probes a random sample of active threads and forgets the unreachable
/// ones. Unsampled threads are left alone.
pub struct Sweeper {
    platform: Arc<dyn ChatPlatform>,
    threads: Arc<ActiveThreads>,
    interval: Duration,
    sample_size: usize,
}

impl Sweeper {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        threads: Arc<ActiveThreads>,
        interval: Duration,
        sample_size: usize,
    ) -> Self {
        Self {
            platform,
            threads,
            interval,
            sample_size,
        }
    }

    /// Claim the sweep slot if the interval has elapsed.
    pub fn due(&self, now: Instant) -> bool {
        self.threads.sweep_due(now, self.interval)
    }

    /// Sweep if due; `None` when it was not.
    pub async fn maybe_sweep(&self, now: Instant) -> Option<SweepReport> {
        if !self.due(now) {
            return None;
        }
        Some(self.sweep().await)
    }

    pub async fn sweep(&self) -> SweepReport {
        let sample = self.threads.sample(self.sample_size);
        let mut gone = Vec::new();
        for thread_id in &sample {
            if let Err(e) = self.platform.get_message(thread_id).await {
                debug!(thread_id = %thread_id, error = %e, "Thread root unreachable");
                gone.push(thread_id.clone());
            }
        }

        let evicted = self.threads.evict(&gone);
        info!(
            sampled = sample.len(),
            evicted,
            remaining = self.threads.len(),
            "Active thread sweep finished"
        );
        SweepReport {
            sampled: sample.len(),
            evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_channels::MemoryPlatform;

    fn setup(ids: &[&str]) -> (Arc<MemoryPlatform>, Arc<ActiveThreads>, Sweeper) {
        let platform = Arc::new(MemoryPlatform::new());
        let threads = Arc::new(ActiveThreads::new());
        for id in ids {
            threads.add(id);
        }
        let sweeper = Sweeper::new(platform.clone(), threads.clone(), Duration::from_secs(600), 5);
        (platform, threads, sweeper)
    }

    #[tokio::test]
    async fn evicts_only_unreachable_sampled_threads() {
        let (platform, threads, sweeper) = setup(&["a", "b", "c", "d"]);
        platform.mark_unreachable("b");
        platform.mark_unreachable("d");

        let report = sweeper.sweep().await;
        assert_eq!(report, SweepReport { sampled: 4, evicted: 2 });
        assert!(threads.contains("a"));
        assert!(threads.contains("c"));
        assert!(!threads.contains("b"));

        let again = sweeper.sweep().await;
        assert_eq!(again.evicted, 0);
        assert_eq!(threads.len(), 2);
    }

    #[tokio::test]
    async fn unsampled_thread_survives() {
        let ids = ["t1", "t2", "t3", "t4", "t5", "t6"];
        let (platform, threads, sweeper) = setup(&ids);
        for id in ids {
            platform.mark_unreachable(id);
        }

        let report = sweeper.sweep().await;
        assert_eq!(report, SweepReport { sampled: 5, evicted: 5 });
        assert_eq!(threads.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_at_most_once_per_interval() {
        let (platform, threads, sweeper) = setup(&["a"]);
        platform.mark_unreachable("a");

        assert!(sweeper.maybe_sweep(Instant::now()).await.is_none());
        assert!(threads.contains("a"));

        tokio::time::advance(Duration::from_secs(600)).await;
        let report = sweeper.maybe_sweep(Instant::now()).await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(sweeper.maybe_sweep(Instant::now()).await.is_none());
    }
}
