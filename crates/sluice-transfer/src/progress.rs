/// Progress observers.
///
/// Called synchronously from the flush step with the byte count of each
/// chunk as it is committed. Reporters must not block. A panicking reporter
/// is logged and otherwise ignored; it never fails the transfer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observer of newly committed bytes.
pub trait ProgressReporter {
    fn on_commit(&mut self, bytes: u64);
}

impl<F: FnMut(u64)> ProgressReporter for F {
    fn on_commit(&mut self, bytes: u64) {
        self(bytes)
    }
}

/// Reporter that ignores everything.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_commit(&mut self, _bytes: u64) {}
}

/// Invoke `reporter`, containing any panic it raises.
pub(crate) fn notify<P: ProgressReporter + ?Sized>(reporter: &mut P, bytes: u64) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| reporter.on_commit(bytes)));
    if result.is_err() {
        tracing::warn!(bytes, "progress reporter panicked; ignoring");
    }
}

/// Counters shared with other threads (UI, metrics), all lock-free.
#[derive(Clone, Default)]
pub struct SharedProgress {
    inner: Arc<ProgressCounters>,
}

#[derive(Default)]
struct ProgressCounters {
    bytes_total: AtomicU64,
    bytes_done: AtomicU64,
    chunks_done: AtomicU64,
}

impl SharedProgress {
    pub fn new(bytes_total: u64) -> Self {
        let progress = Self::default();
        progress.inner.bytes_total.store(bytes_total, Ordering::Relaxed);
        progress
    }

    pub fn bytes_done(&self) -> u64 {
        self.inner.bytes_done.load(Ordering::Relaxed)
    }

    pub fn bytes_total(&self) -> u64 {
        self.inner.bytes_total.load(Ordering::Relaxed)
    }

    pub fn chunks_done(&self) -> u64 {
        self.inner.chunks_done.load(Ordering::Relaxed)
    }

    /// Progress as a fraction 0.0 - 1.0.
    pub fn fraction(&self) -> f64 {
        let total = self.bytes_total();
        if total == 0 {
            return 0.0;
        }
        (self.bytes_done() as f64 / total as f64).min(1.0)
    }
}

impl ProgressReporter for SharedProgress {
    fn on_commit(&mut self, bytes: u64) {
        self.inner.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.inner.chunks_done.fetch_add(1, Ordering::Relaxed);
    }
}

/// Default logging step: 4 MiB.
pub const DEFAULT_LOG_STEP: u64 = 4 * 1024 * 1024;

/// Logs one line each time another `step` bytes have been committed.
pub struct StepLogger {
    step: u64,
    since_last: u64,
    total: u64,
}

impl StepLogger {
    pub fn new(step: u64) -> Self {
        Self {
            step: step.max(1),
            since_last: 0,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for StepLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_STEP)
    }
}

impl ProgressReporter for StepLogger {
    fn on_commit(&mut self, bytes: u64) {
        self.since_last += bytes;
        self.total += bytes;
        while self.since_last >= self.step {
            tracing::info!("{} MiB transferred", self.total / (1024 * 1024));
            self.since_last -= self.step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_reporters() {
        let mut seen = Vec::new();
        notify(&mut |n: u64| seen.push(n), 10);
        notify(&mut |n: u64| seen.push(n), 20);
        assert_eq!(seen, vec![10, 20]);
    }

    #[test]
    fn panicking_reporter_is_contained() {
        let mut calls = 0;
        let mut reporter = |_n: u64| {
            calls += 1;
            if calls > 0 {
                panic!("observer bug");
            }
        };
        notify(&mut reporter, 1);
        notify(&mut reporter, 1);
        assert_eq!(calls, 2);
    }

    #[test]
    fn shared_progress_is_visible_through_clones() {
        let progress = SharedProgress::new(200);
        let mut writer = progress.clone();
        writer.on_commit(50);
        writer.on_commit(50);
        assert_eq!(progress.bytes_done(), 100);
        assert_eq!(progress.chunks_done(), 2);
        assert!((progress.fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn step_logger_tracks_remainder() {
        let mut logger = StepLogger::new(100);
        logger.on_commit(70);
        logger.on_commit(70);
        assert_eq!(logger.total(), 140);
        assert_eq!(logger.since_last, 40);
    }
}
