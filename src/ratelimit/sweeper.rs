//! Background eviction of idle visitors.
//!
//! Each tick inspects a bounded batch of keys, continuing where the previous
//! tick stopped, so per-tick cost does not grow with the number of clients.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::limiter::RateLimiter;

impl RateLimiter {
    /// Start the background sweep.
    ///
    /// Only the first call spawns the task and returns its handle; later calls
    /// return `None`. The task runs until the limiter's cancellation token is
    /// cancelled. Must be called from within a Tokio runtime.
    pub fn start_cleanup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .cleanup_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let limiter = Arc::clone(self);
        Some(tokio::spawn(async move { limiter.run_cleanup().await }))
    }

    async fn run_cleanup(&self) {
        let period = self.cleanup_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?period,
            stale_after = ?self.stale_after,
            batch_size = self.cleanup_batch_size,
            "Visitor cleanup started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Visitor cleanup stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
    }

    /// Run one eviction pass as of `now`.
    ///
    /// Inspects up to `cleanup_batch_size` keys starting at the persisted
    /// cursor, wrapping around the key snapshot, and removes visitors idle
    /// for longer than `stale_after`. Returns the number of evictions.
    pub fn sweep(&self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.stale_after) else {
            return 0;
        };

        let keys = self.store.keys();
        let total = keys.len();
        if total == 0 {
            return 0;
        }

        let start = self.cleanup_cursor.load(Ordering::Relaxed) % total;
        let len = self.cleanup_batch_size.min(total);
        self.cleanup_cursor.store((start + len) % total, Ordering::Relaxed);

        let mut evicted = 0;
        for key in keys.iter().cycle().skip(start).take(len) {
            let Some(visitor) = self.store.get(key) else {
                continue;
            };
            if !visitor.is_stale(cutoff) {
                continue;
            }
            // The visitor may have been used since the check above.
            if self.store.remove_if_stale(key, cutoff) {
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(
                evicted = evicted,
                inspected = len,
                remaining = self.store.len(),
                "Evicted stale visitors"
            );
        }
        evicted
    }
}
