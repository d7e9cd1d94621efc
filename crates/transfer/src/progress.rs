//! Batch-wide transfer progress shared between workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Progress is logged every time another this-many percent completes.
const REPORT_STEP_PERCENT: u64 = 10;

/// Monotonic byte counter over the expected total of a batch.
#[derive(Debug)]
pub struct TransferProgress {
    total_bytes: u64,
    transferred: AtomicU64,
    reported_step: AtomicU64,
    started_at: Instant,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred: AtomicU64::new(0),
            reported_step: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record `bytes` of source data consumed. Returns the new running total.
    pub fn add(&self, bytes: u64) -> u64 {
        let now = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.report(now);
        now
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn percent_complete(&self) -> Option<f64> {
        (self.total_bytes > 0)
            .then(|| (self.transferred() as f64 / self.total_bytes as f64) * 100.0)
    }

    pub fn bytes_per_second(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transferred() as f64 / elapsed
        } else {
            0.0
        }
    }

    fn report(&self, transferred: u64) {
        if self.total_bytes == 0 {
            return;
        }
        let percent = transferred.min(self.total_bytes) * 100 / self.total_bytes;
        let step = percent / REPORT_STEP_PERCENT;
        if self.reported_step.fetch_max(step, Ordering::Relaxed) < step {
            info!(
                transferred = transferred,
                total = self.total_bytes,
                percent = step * REPORT_STEP_PERCENT,
                speed = format!("{:.1} KB/s", self.bytes_per_second() / 1024.0),
                "Transfer progress"
            );
        }
    }
}
