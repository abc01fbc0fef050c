//! Processing-time aggregation.
//!
//! Two phases feed the same cumulative counter: the synchronous submission
//! path and the worker's post-delay compute step. The fixed delay itself is
//! never measured. Submission timing is taken by a drop guard so that a
//! submission rejected before any worker is spawned is still timed.
//!
//! Every recorded duration is also forwarded to the `metrics` facade under
//! the names in [`names`]; those are for dashboards only and do not feed
//! [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::time::Instant;

/// Metric names exported through the `metrics` facade.
pub mod names {
    /// Accepted submissions.
    pub const SUBMISSIONS_TOTAL: &str = "hashd_submissions_total";
    /// Submissions rejected before a worker was spawned.
    pub const REJECTED_SUBMISSIONS_TOTAL: &str = "hashd_rejected_submissions_total";
    /// Results committed to the store.
    pub const COMMITS_TOTAL: &str = "hashd_commits_total";
    /// Workers that finished without committing.
    pub const WORKER_FAILURES_TOTAL: &str = "hashd_worker_failures_total";
    /// Workers that have been spawned and not yet finished.
    pub const IN_FLIGHT_WORKERS: &str = "hashd_in_flight_workers";
    /// Measured duration per phase, in seconds.
    pub const PROCESSING_DURATION_SECONDS: &str = "hashd_processing_duration_seconds";
}

/// A measured phase of request processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting a submission, up to the point the caller gets an id back.
    Submission,
    /// Computing and committing a digest after the delay.
    Compute,
}

impl Phase {
    /// Label used for the phase in exported metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Compute => "compute",
        }
    }
}

/// Aggregate statistics as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Accepted submissions.
    pub total: u64,
    /// Cumulative processing time divided by `total`, floored, in microseconds.
    pub average: u64,
}

/// Cumulative processing time across both measured phases.
#[derive(Debug, Default)]
pub struct ProcessingMetrics {
    cumulative_micros: AtomicU64,
}

impl ProcessingMetrics {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a measured duration for `phase`.
    pub fn record_duration(&self, phase: Phase, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.cumulative_micros.fetch_add(micros, Ordering::AcqRel);
        histogram!(names::PROCESSING_DURATION_SECONDS, "phase" => phase.as_str())
            .record(elapsed.as_secs_f64());
    }

    /// Total microseconds recorded so far.
    pub fn cumulative_micros(&self) -> u64 {
        self.cumulative_micros.load(Ordering::Acquire)
    }

    /// Derives the reported statistics for `total` accepted submissions.
    ///
    /// `total` comes from the identifier allocator. The two counters are read
    /// independently, so a snapshot taken under load may be slightly skewed.
    pub fn snapshot(&self, total: u64) -> StatsSnapshot {
        let average = self
            .cumulative_micros()
            .checked_div(total)
            .unwrap_or_default();
        StatsSnapshot { total, average }
    }

    /// Starts timing `phase`; the duration is recorded when the guard drops.
    pub fn start_timer(&self, phase: Phase) -> Stopwatch<'_> {
        Stopwatch {
            metrics: self,
            phase,
            started: Instant::now(),
        }
    }
}

/// Records elapsed time into [`ProcessingMetrics`] on drop.
#[derive(Debug)]
#[must_use = "the duration is recorded when the stopwatch is dropped"]
pub struct Stopwatch<'a> {
    metrics: &'a ProcessingMetrics,
    phase: Phase,
    started: Instant,
}

impl Drop for Stopwatch<'_> {
    fn drop(&mut self) {
        self.metrics
            .record_duration(self.phase, self.started.elapsed());
    }
}

/// Keeps the in-flight worker gauge accurate, including on panic.
#[derive(Debug)]
pub(crate) struct InFlightWorker {
    _private: (),
}

impl InFlightWorker {
    pub(crate) fn new() -> Self {
        gauge!(names::IN_FLIGHT_WORKERS).increment(1.0);
        Self { _private: () }
    }
}

impl Drop for InFlightWorker {
    fn drop(&mut self) {
        gauge!(names::IN_FLIGHT_WORKERS).decrement(1.0);
    }
}

pub(crate) fn record_submission() {
    counter!(names::SUBMISSIONS_TOTAL).increment(1);
}

pub(crate) fn record_rejection() {
    counter!(names::REJECTED_SUBMISSIONS_TOTAL).increment(1);
}

pub(crate) fn record_commit() {
    counter!(names::COMMITS_TOTAL).increment(1);
}

pub(crate) fn record_worker_failure() {
    counter!(names::WORKER_FAILURES_TOTAL).increment(1);
}
