//! Memory-pressure cleanup after inference calls.

use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::guard::rate_limit::RateLimiter;
use crate::model::provisioner::Provisioner;
use crate::monitor::StatsProvider;

pub struct MemoryGuard {
    monitor: Arc<dyn StatsProvider>,
    high_water_percent: f32,
    cleaning: Arc<AtomicBool>,
}

impl MemoryGuard {
    pub fn new(monitor: Arc<dyn StatsProvider>, high_water_percent: f32) -> Self {
        Self {
            monitor,
            high_water_percent,
            cleaning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Samples memory and, above the high-water mark, starts a cleanup pass
    /// in the background. Never waits for the cleanup.
    ///
    /// Returns the cleanup task when one was started. At most one cleanup
    /// runs at a time.
    pub fn relieve(
        &self,
        provisioner: &Arc<Provisioner>,
        limiter: &Arc<RateLimiter>,
    ) -> Option<JoinHandle<()>> {
        let stats = self.monitor.sample();
        if stats.memory_percent <= self.high_water_percent {
            return None;
        }
        if self.cleaning.swap(true, Ordering::AcqRel) {
            return None;
        }

        warn!(
            memory_percent = stats.memory_percent,
            high_water_percent = self.high_water_percent,
            "High memory usage, starting cleanup"
        );
        counter!("memory_cleanups_total", 1);

        let provisioner = Arc::clone(provisioner);
        let limiter = Arc::clone(limiter);
        let monitor = Arc::clone(&self.monitor);
        let cleaning = Arc::clone(&self.cleaning);

        Some(tokio::task::spawn_blocking(move || {
            let _reset = ResetOnDrop(cleaning);
            provisioner.release_caches();
            let pruned = limiter.prune(Instant::now());
            let after = monitor.sample();
            info!(
                pruned_clients = pruned,
                memory_percent = after.memory_percent,
                "Memory cleanup finished"
            );
        }))
    }
}

/// Clears the in-progress flag however the cleanup pass ends.
struct ResetOnDrop(Arc<AtomicBool>);

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
