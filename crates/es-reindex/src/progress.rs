//! Shared counters and the periodic progress report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::info;

/// Run-wide counters. Every field is updated atomically and read without a
/// snapshot lock, so a printout may mix values from slightly different moments.
#[derive(Debug)]
pub struct Counters {
    start: Instant,
    /// Documents matched by the scan.
    pub total: AtomicU64,
    /// Documents read from the scroll.
    pub read: AtomicU64,
    /// Documents dropped by the filter or unchanged in place.
    pub skipped: AtomicU64,
    /// Documents put into a bulk body.
    pub written: AtomicU64,
    /// Bulk items acknowledged by the store.
    pub acked: AtomicU64,
    /// Bulk items written successfully.
    pub succeeded: AtomicU64,
    /// Bulk items rejected by the store.
    pub failed: AtomicU64,
    /// Bulk calls issued.
    pub batches: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            total: AtomicU64::new(0),
            read: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            written: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }
}

impl Counters {
    /// Fresh counters, with the clock starting now.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Records the scan total the first time it becomes known.
    pub fn set_total_once(&self, total: u64) {
        let _ = self
            .total
            .compare_exchange(0, total, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Time since the counters were created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total.load(Ordering::Relaxed),
            read: self.read.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Plain copy of [`Counters`] at one moment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterSnapshot {
    /// Documents matched by the scan.
    pub total: u64,
    /// Documents read.
    pub read: u64,
    /// Documents skipped.
    pub skipped: u64,
    /// Documents queued for bulk.
    pub written: u64,
    /// Bulk items acknowledged.
    pub acked: u64,
    /// Bulk items succeeded.
    pub succeeded: u64,
    /// Bulk items failed.
    pub failed: u64,
    /// Bulk calls.
    pub batches: u64,
    /// Time since start.
    pub elapsed: Duration,
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "counter[read={}/{} skip={} bulk_total={} bulk_no={} bulk_ack={} suc={} fail={}]",
            self.read,
            self.total,
            self.skipped,
            self.written,
            self.batches,
            self.acked,
            self.succeeded,
            self.failed
        )
    }
}

/// Completion estimate derived from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Fraction of the total already read, 0.0..=1.0 (may overshoot on a live source).
    pub finish_rate: f64,
    /// Expected time until everything is read.
    pub remaining: Duration,
}

impl Estimate {
    /// `remaining = (total - read) / (read / elapsed)`. `None` when the total
    /// is unknown or nothing has been read yet.
    pub fn compute(total: u64, read: u64, elapsed: Duration) -> Option<Self> {
        if total == 0 || read == 0 {
            return None;
        }
        let finish_rate = read as f64 / total as f64;
        let secs = elapsed.as_secs_f64();
        let remaining = if secs > 0.0 {
            total.saturating_sub(read) as f64 / (read as f64 / secs)
        } else {
            0.0
        };
        Some(Self {
            finish_rate,
            remaining: Duration::from_secs_f64(remaining),
        })
    }

    /// Wall-clock time at which the run should finish.
    pub fn finish_time(&self) -> chrono::DateTime<chrono::Local> {
        let remaining =
            chrono::Duration::from_std(self.remaining).unwrap_or_else(|_| chrono::Duration::zero());
        chrono::Local::now()
            .checked_add_signed(remaining)
            .unwrap_or_else(chrono::Local::now)
    }
}

/// Renders one progress line.
pub fn progress_line(snapshot: &CounterSnapshot) -> String {
    match Estimate::compute(snapshot.total, snapshot.read, snapshot.elapsed) {
        Some(estimate) => format!(
            "{} rate={:.2}% need={:.1}s finish_time={}",
            snapshot,
            100.0 * estimate.finish_rate,
            estimate.remaining.as_secs_f64(),
            estimate.finish_time().format("%Y-%m-%d %H:%M:%S")
        ),
        None => snapshot.to_string(),
    }
}

/// Logs a progress line on a fixed interval until stopped or dropped.
pub struct ProgressTracker {
    handle: JoinHandle<()>,
}

impl ProgressTracker {
    /// Starts reporting every `interval`.
    pub fn start(counters: Arc<Counters>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("{}", progress_line(&counters.snapshot()));
            }
        });
        Self { handle }
    }

    /// Stops reporting.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
