//! Schedule-based rate pacing shared by all workers of a load generator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Paces unit-of-work submission to a target rate.
///
/// The controller tracks its start instant and a monotonically increasing
/// `sent_count`. Each call to [`wait_for_next_slot`](Self::wait_for_next_slot)
/// claims the next slot on the schedule; a caller ahead of schedule sleeps
/// until its slot is due, a caller behind schedule returns immediately so
/// workers catch up after a stall without penalty.
///
/// [`update_rate`](Self::update_rate) retargets subsequent slots atomically
/// without resetting `sent_count` or the start instant, so a live rate change
/// never causes a discontinuity in the schedule baseline. A target of `0`
/// means unthrottled.
pub struct RateController {
    started_at: Instant,
    sent: AtomicU64,
    target_bits: AtomicU64,
}

impl RateController {
    pub fn new(target_tps: f64) -> Self {
        Self {
            started_at: Instant::now(),
            sent: AtomicU64::new(0),
            target_bits: AtomicU64::new(target_tps.max(0.0).to_bits()),
        }
    }

    /// Suspend until the caller is on schedule, then return.
    pub async fn wait_for_next_slot(&self) {
        // Claim the slot up front; concurrent workers each pace their own
        // slot instead of racing for the same one.
        let slot = self.sent.fetch_add(1, Ordering::Relaxed);
        let rate = self.target_rate();
        if rate <= 0.0 {
            return;
        }
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let expected = elapsed * rate;
        if slot as f64 >= expected {
            let due = (slot as f64 + 1.0) / rate;
            let delay = due - elapsed;
            if delay > 0.0 {
                sleep(Duration::from_secs_f64(delay)).await;
            }
        }
    }

    /// Retarget the rate for subsequent slots. `0` disables throttling.
    pub fn update_rate(&self, target_tps: f64) {
        self.target_bits
            .store(target_tps.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn target_rate(&self) -> f64 {
        f64::from_bits(self.target_bits.load(Ordering::Relaxed))
    }

    /// Achieved rate so far: `sent_count / elapsed_seconds`.
    pub fn current_rate(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.sent.load(Ordering::Relaxed) as f64 / elapsed
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
