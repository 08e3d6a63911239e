//! Completion timing monitor
//!
//! Counts buffer completions and device starvation, and flags completions
//! that arrive noticeably early or late relative to the buffer duration.
//!
//! Recording is lock-free so it can run on the device's notification thread;
//! a separate tokio task polls the counters and does the logging.

use crate::playback::pool::BufferPool;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fraction of the expected interval a completion may deviate by
const INTERVAL_TOLERANCE: f64 = 0.20;

/// Poll period of the monitoring task
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Health line cadence, in polls
const HEALTH_EVERY_POLLS: u64 = 20;

/// Completion timing monitor
pub struct CompletionMonitor {
    /// Monotonic reference for interval measurement
    start_time: Instant,

    /// Last completion time (nanoseconds since start_time, 0 = none yet)
    last_completion_ns: AtomicU64,

    completion_count: AtomicU64,

    /// Times the device had nothing to play
    underrun_count: AtomicU64,

    /// Completions whose spacing deviated beyond tolerance
    irregular_intervals: AtomicU64,

    /// Expected spacing between completions (0 = not checked)
    expected_interval_ns: u64,
    tolerance_ns: u64,
}

impl CompletionMonitor {
    /// Create a monitor.
    ///
    /// `expected_interval` is the buffer duration for a device playing in
    /// real time, or `None` for devices with no fixed cadence.
    pub fn new(expected_interval: Option<Duration>) -> Self {
        let expected_interval_ns = expected_interval.map_or(0, |d| d.as_nanos() as u64);
        let tolerance_ns = (expected_interval_ns as f64 * INTERVAL_TOLERANCE) as u64;

        if expected_interval_ns > 0 {
            debug!(
                "CompletionMonitor initialized: expected_interval={:.2}ms, tolerance={:.2}ms",
                expected_interval_ns as f64 / 1_000_000.0,
                tolerance_ns as f64 / 1_000_000.0
            );
        }

        Self {
            start_time: Instant::now(),
            last_completion_ns: AtomicU64::new(0),
            completion_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            irregular_intervals: AtomicU64::new(0),
            expected_interval_ns,
            tolerance_ns,
        }
    }

    /// Record one buffer completion.
    ///
    /// Atomics only; safe on a real-time thread.
    pub fn record_completion(&self) {
        // max(1) keeps 0 reserved for "no completion yet"
        let now_ns = (self.start_time.elapsed().as_nanos() as u64).max(1);
        let last_ns = self.last_completion_ns.swap(now_ns, Ordering::Relaxed);
        self.completion_count.fetch_add(1, Ordering::Relaxed);

        if last_ns == 0 || self.expected_interval_ns == 0 {
            return;
        }

        let actual_interval_ns = now_ns.saturating_sub(last_ns);
        if actual_interval_ns.abs_diff(self.expected_interval_ns) > self.tolerance_ns {
            self.irregular_intervals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record that the device ran out of submitted samples.
    ///
    /// Atomics only; safe on a real-time thread.
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            completion_count: self.completion_count.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
            irregular_intervals: self.irregular_intervals.load(Ordering::Relaxed),
            expected_interval_ms: self.expected_interval_ns / 1_000_000,
        }
    }

    /// Spawn the task that polls stats and logs.
    ///
    /// Returns the stop flag; set it to end the task.
    pub fn spawn_monitoring_task(
        self: Arc<Self>,
        rt_handle: &tokio::runtime::Handle,
        pool: Arc<BufferPool>,
    ) -> Arc<AtomicBool> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let monitor = self;

        rt_handle.spawn(async move {
            let mut last_underruns = 0u64;
            let mut last_irregular = 0u64;
            let mut last_completions = 0u64;
            let mut polls = 0u64;

            debug!("CompletionMonitor: monitoring task started");

            while !stop_flag.load(Ordering::Relaxed) {
                tokio::time::sleep(POLL_INTERVAL).await;
                polls += 1;

                let stats = monitor.stats();

                if stats.completion_count > last_completions {
                    debug!(
                        "Got {} buffer(s) back ({} total)",
                        stats.completion_count - last_completions,
                        stats.completion_count
                    );
                    last_completions = stats.completion_count;
                }

                if stats.underrun_count > last_underruns {
                    warn!(
                        "Output underrun: device starved {} time(s) (+{} since last check)",
                        stats.underrun_count,
                        stats.underrun_count - last_underruns
                    );
                    last_underruns = stats.underrun_count;
                }

                if stats.irregular_intervals > last_irregular {
                    warn!(
                        "Irregular completion spacing: {} total (+{}), expected every {}ms",
                        stats.irregular_intervals,
                        stats.irregular_intervals - last_irregular,
                        stats.expected_interval_ms
                    );
                    last_irregular = stats.irregular_intervals;
                }

                if polls % HEALTH_EVERY_POLLS == 0 {
                    let pool_stats = pool.stats();
                    debug!(
                        "Pool health: {} free, {} in flight, {} leased, {} submitted, {} completed",
                        pool_stats.free,
                        pool_stats.in_flight,
                        pool_stats.leased,
                        pool_stats.submitted_total,
                        pool_stats.completed_total
                    );
                }
            }

            info!("CompletionMonitor: monitoring task stopped");
        });

        stop
    }
}

/// Monitor counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub completion_count: u64,
    pub underrun_count: u64,
    pub irregular_intervals: u64,
    pub expected_interval_ms: u64,
}
