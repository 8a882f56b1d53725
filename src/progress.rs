// src/progress.rs

//! Progress reporting and cancellation
//!
//! Every long-running operation reports an integer percentage (0..=100)
//! to a [`ProgressSink`]. Sinks must be thread-safe: parallel downloads
//! and per-file patching report from rayon workers.
//!
//! # Composition
//!
//! - [`RangeProgress`] maps a child's 0..100 into a slice of its parent
//! - [`ByteAggregator`] turns byte counts from many workers into one percentage
//! - [`MonotonicProgress`] drops any value that is not an increase
//!
//! # Example
//!
//! ```ignore
//! use updraft::progress::{CallbackProgress, MonotonicProgress, RangeProgress};
//!
//! let host = CallbackProgress::new(|p| println!("{}%", p));
//! let overall = MonotonicProgress::new(&host);
//! let extract = RangeProgress::new(&overall, 0, 10);
//! extract.report(50); // host sees 5%
//! ```

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use tracing::info;

/// Receiver of percentage progress updates
pub trait ProgressSink: Send + Sync {
    /// Report progress as a percentage in 0..=100
    fn report(&self, percent: u8);
}

/// Progress sink that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl SilentProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressSink for SilentProgress {
    fn report(&self, _percent: u8) {}
}

/// Logging progress sink
///
/// Logs to tracing at info level, once per `step` percent crossed, to
/// avoid flooding logs from byte-level download callbacks.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    last_logged: AtomicU64,
    step: u64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_logged: AtomicU64::new(0),
            step: 10,
        }
    }

    /// Set the logging interval in percent
    pub fn with_step(mut self, step: u8) -> Self {
        self.step = u64::from(step.max(1));
        self
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, percent: u8) {
        let percent = u64::from(percent.min(100));
        let bucket = percent / self.step * self.step;
        let previous = self.last_logged.fetch_max(bucket, Ordering::Relaxed);
        if bucket > previous || (percent == 100 && previous < 100) {
            info!("{}: {}%", self.name, percent);
        }
    }
}

/// Callback-based progress sink
///
/// Calls the user function only when the reported value changes.
pub struct CallbackProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    callback: F,
    last: AtomicU64,
}

/// Sentinel meaning "nothing reported yet"
const UNREPORTED: u64 = u64::MAX;

impl<F> CallbackProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            last: AtomicU64::new(UNREPORTED),
        }
    }
}

impl<F> ProgressSink for CallbackProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if self.last.swap(u64::from(percent), Ordering::Relaxed) != u64::from(percent) {
            (self.callback)(percent);
        }
    }
}

/// Forwards only strictly increasing values
///
/// The highest value seen is kept with `fetch_max`, so stale reports from
/// slower workers are dropped without locking. A value that raises the
/// maximum is forwarded under a lock that re-reads the maximum, so two
/// rising reports can never reach the host in the wrong order.
pub struct MonotonicProgress<'a> {
    inner: &'a dyn ProgressSink,
    current: AtomicU8,
    forwarded: Mutex<u8>,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            current: AtomicU8::new(0),
            forwarded: Mutex::new(0),
        }
    }

    /// Highest value reported so far
    pub fn current(&self) -> u8 {
        self.current.load(Ordering::Acquire)
    }
}

impl ProgressSink for MonotonicProgress<'_> {
    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if self.current.fetch_max(percent, Ordering::AcqRel) >= percent {
            return;
        }

        let mut forwarded = self.forwarded.lock().unwrap_or_else(PoisonError::into_inner);
        let latest = self.current.load(Ordering::Acquire);
        if latest > *forwarded {
            *forwarded = latest;
            self.inner.report(latest);
        }
    }
}

/// Maps a child's 0..=100 into `start..=end` of the parent
pub struct RangeProgress<'a> {
    parent: &'a dyn ProgressSink,
    start: u8,
    end: u8,
}

impl<'a> RangeProgress<'a> {
    pub fn new(parent: &'a dyn ProgressSink, start: u8, end: u8) -> Self {
        let end = end.min(100);
        Self {
            parent,
            start: start.min(end),
            end,
        }
    }

    fn scale(&self, percent: u8) -> u8 {
        let span = u32::from(self.end - self.start);
        (u32::from(self.start) + span * u32::from(percent.min(100)) / 100) as u8
    }
}

impl ProgressSink for RangeProgress<'_> {
    fn report(&self, percent: u8) {
        self.parent.report(self.scale(percent));
    }
}

/// Combines byte counts reported by many workers into one percentage
///
/// Each worker adds the bytes it completed since its last report; the
/// shared counter is the only synchronization point.
pub struct ByteAggregator<'a> {
    parent: &'a dyn ProgressSink,
    total: u64,
    done: AtomicU64,
}

impl<'a> ByteAggregator<'a> {
    pub fn new(parent: &'a dyn ProgressSink, total: u64) -> Self {
        Self {
            parent,
            total,
            done: AtomicU64::new(0),
        }
    }

    /// Record `bytes` more completed work
    pub fn add(&self, bytes: u64) {
        let done = self.done.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let percent = if self.total == 0 {
            100
        } else {
            (done.min(self.total) * 100 / self.total) as u8
        };
        self.parent.report(percent);
    }

    /// Sink for one item of `size` bytes that feeds this aggregator
    pub fn item(&self, size: u64) -> ItemProgress<'_> {
        ItemProgress {
            aggregator: self,
            size,
            reported: AtomicU64::new(0),
        }
    }
}

/// Per-item view of a [`ByteAggregator`]
///
/// Converts the item's own percentage into the bytes it represents and
/// forwards only the growth since the last report.
pub struct ItemProgress<'a> {
    aggregator: &'a ByteAggregator<'a>,
    size: u64,
    reported: AtomicU64,
}

impl ProgressSink for ItemProgress<'_> {
    fn report(&self, percent: u8) {
        let bytes = self.size * u64::from(percent.min(100)) / 100;
        let previous = self.reported.fetch_max(bytes, Ordering::Relaxed);
        if bytes > previous {
            self.aggregator.add(bytes - previous);
        }
    }
}

/// Percentage of `done` out of `total`, 100 when `total` is zero
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        100
    } else {
        (done.min(total).saturating_mul(100) / total) as u8
    }
}

/// Cooperative cancellation flag shared between the host and workers
///
/// Operations check the token between files and between transfer chunks
/// and return [`Error::Cancelled`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, CallbackProgress<impl Fn(u8) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = CallbackProgress::new(move |p| sink_seen.lock().unwrap().push(p));
        (seen, sink)
    }

    #[test]
    fn test_callback_only_on_change() {
        let (seen, sink) = recorder();
        sink.report(5);
        sink.report(5);
        sink.report(7);
        assert_eq!(*seen.lock().unwrap(), vec![5, 7]);
    }

    #[test]
    fn test_monotonic_drops_regressions() {
        let (seen, sink) = recorder();
        let mono = MonotonicProgress::new(&sink);
        for p in [10, 30, 20, 30, 50, 0, 100] {
            mono.report(p);
        }
        assert_eq!(*seen.lock().unwrap(), vec![10, 30, 50, 100]);
        assert_eq!(mono.current(), 100);
    }

    #[test]
    fn test_monotonic_keeps_order_while_host_is_busy() {
        use std::sync::mpsc;
        use std::time::Duration;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        // The host is still handling 50 when a worker reports 60
        let host = CallbackProgress::new(move |p| {
            if p == 50 {
                entered_tx.lock().unwrap().send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
            }
            sink_seen.lock().unwrap().push(p);
        });
        let mono = MonotonicProgress::new(&host);

        std::thread::scope(|s| {
            s.spawn(|| mono.report(50));
            entered_rx.recv().unwrap();
            s.spawn(|| mono.report(60));
        });

        assert_eq!(*seen.lock().unwrap(), vec![50, 60]);
        assert_eq!(mono.current(), 60);
    }

    #[test]
    fn test_range_mapping() {
        let (seen, sink) = recorder();
        let range = RangeProgress::new(&sink, 10, 80);
        range.report(0);
        range.report(50);
        range.report(100);
        assert_eq!(*seen.lock().unwrap(), vec![10, 45, 80]);
    }

    #[test]
    fn test_aggregator_weights_by_size() {
        let (seen, sink) = recorder();
        let aggregator = ByteAggregator::new(&sink, 400);
        let small = aggregator.item(100);
        let large = aggregator.item(300);

        small.report(100);
        large.report(50);
        large.report(40);
        large.report(100);

        assert_eq!(*seen.lock().unwrap(), vec![25, 62, 100]);
    }

    #[test]
    fn test_aggregator_concurrent_reports_reach_total() {
        use rayon::prelude::*;

        let (seen, sink) = recorder();
        let mono = MonotonicProgress::new(&sink);
        let aggregator = ByteAggregator::new(&mono, 64 * 1000);

        (0..64).into_par_iter().for_each(|_| {
            let item = aggregator.item(1000);
            for p in (0..=100).step_by(5) {
                item.report(p);
            }
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(300, 200), 100);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());
        token.cancel();
        assert!(matches!(worker.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_log_progress_does_not_panic() {
        let sink = LogProgress::new("download").with_step(25);
        for p in 0..=100 {
            sink.report(p);
        }
    }
}
