//! Shutdown coordination and drain.
//!
//! The coordinator moves through `Running -> ShutdownRequested -> Draining
//! -> Terminated`. Requesting shutdown only flips state and wakes waiters;
//! [`ShutdownCoordinator::drain`] then polls the engine until every accepted
//! submission has settled or the maximum drain duration runs out. Workers
//! are never cancelled.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::engine::HashEngine;
use crate::RequestId;

/// Default interval between drain progress checks.
pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on the drain phase.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle phase of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ShutdownPhase {
    /// Accepting submissions normally.
    Running = 0,
    /// Shutdown was requested; draining has not started.
    ShutdownRequested = 1,
    /// Waiting for outstanding workers.
    Draining = 2,
    /// Drain finished; the process may exit.
    Terminated = 3,
}

impl ShutdownPhase {
    /// Snake-case name, as reported by health checks.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ShutdownRequested => "shutdown_requested",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::ShutdownRequested,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

/// Snapshot of submission settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainProgress {
    /// Submissions accepted (identifiers issued).
    pub accepted: u64,
    /// Results committed.
    pub committed: u64,
    /// Workers that finished without committing.
    pub failed: u64,
}

impl DrainProgress {
    /// Submissions that reached a final state.
    pub fn settled(&self) -> u64 {
        self.committed + self.failed
    }

    /// Submissions still waiting on their worker.
    pub fn outstanding(&self) -> u64 {
        self.accepted.saturating_sub(self.settled())
    }

    /// Whether no accepted submission is still being worked on.
    pub fn is_settled(&self) -> bool {
        self.settled() >= self.accepted
    }
}

/// Drain timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    /// How often progress is checked and logged.
    pub poll_interval: Duration,
    /// Longest the drain may take before outstanding work is abandoned.
    pub max_duration: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
            max_duration: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl DrainConfig {
    /// Creates a drain configuration.
    pub fn new(poll_interval: Duration, max_duration: Duration) -> Self {
        Self {
            poll_interval,
            max_duration,
        }
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every accepted submission was committed.
    Drained,
    /// Every worker finished, but some failed and never committed.
    Incomplete,
    /// The maximum drain duration elapsed with workers still running.
    TimedOut,
}

/// Result of [`ShutdownCoordinator::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// How the drain ended.
    pub outcome: DrainOutcome,
    /// Counts at the moment the drain ended.
    pub progress: DrainProgress,
    /// Identifiers still being worked on when the drain gave up.
    pub abandoned: Vec<RequestId>,
    /// Time spent draining.
    pub elapsed: Duration,
}

impl DrainReport {
    /// Whether every accepted submission was committed.
    pub fn is_clean(&self) -> bool {
        self.outcome == DrainOutcome::Drained
    }
}

/// Coordinates shutdown across the server and the engine.
///
/// Cheap to clone; all clones observe the same phase.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    phase: Arc<AtomicU8>,
    sender: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the `Running` phase.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            phase: Arc::new(AtomicU8::new(ShutdownPhase::Running as u8)),
            sender,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    /// Requests shutdown.
    ///
    /// Idempotent: returns `true` only for the call that moved the
    /// coordinator out of `Running`.
    pub fn request_shutdown(&self) -> bool {
        let first = self
            .phase
            .compare_exchange(
                ShutdownPhase::Running as u8,
                ShutdownPhase::ShutdownRequested as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if first {
            info!("shutdown requested");
            // No receivers is fine; late subscribers see the phase instead.
            let _ = self.sender.send(());
        }
        first
    }

    /// Returns a future that completes once shutdown has been requested.
    pub fn recv(&self) -> ShutdownReceiver {
        // Subscribe before the phase check so a request landing in between
        // is still observed.
        let mut receiver = self.sender.subscribe();
        let phase = Arc::clone(&self.phase);
        ShutdownReceiver {
            inner: Box::pin(async move {
                if phase.load(Ordering::SeqCst) != ShutdownPhase::Running as u8 {
                    return;
                }
                // Closed means every coordinator is gone; treat it as shutdown.
                let _ = receiver.recv().await;
            }),
        }
    }

    /// Waits for outstanding workers, bounded by `config.max_duration`.
    ///
    /// Requests shutdown first if nobody has yet. Progress is logged every
    /// poll interval. On timeout the identifiers still in flight are
    /// reported as abandoned; their workers keep running until the process
    /// exits.
    pub async fn drain(&self, engine: &HashEngine, config: DrainConfig) -> DrainReport {
        self.request_shutdown();
        self.phase
            .store(ShutdownPhase::Draining as u8, Ordering::SeqCst);

        let started = Instant::now();
        // A duration too large to represent as an instant means no deadline.
        let deadline = started.checked_add(config.max_duration);

        loop {
            let progress = engine.progress();

            if progress.is_settled() {
                self.phase
                    .store(ShutdownPhase::Terminated as u8, Ordering::SeqCst);
                let outcome = if progress.committed >= progress.accepted {
                    info!(
                        committed = progress.committed,
                        "exiting cleanly, hashes processed: {}", progress.committed
                    );
                    DrainOutcome::Drained
                } else {
                    warn!(
                        committed = progress.committed,
                        failed = progress.failed,
                        "all workers finished, {} never committed",
                        progress.failed
                    );
                    DrainOutcome::Incomplete
                };
                return DrainReport {
                    outcome,
                    progress,
                    abandoned: Vec::new(),
                    elapsed: started.elapsed(),
                };
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let abandoned = engine.in_flight();
                self.phase
                    .store(ShutdownPhase::Terminated as u8, Ordering::SeqCst);
                warn!(
                    accepted = progress.accepted,
                    committed = progress.committed,
                    abandoned = progress.outstanding(),
                    "drain timed out after {:?}, abandoning in-flight hashes",
                    config.max_duration
                );
                return DrainReport {
                    outcome: DrainOutcome::TimedOut,
                    progress,
                    abandoned,
                    elapsed: started.elapsed(),
                };
            }

            info!(
                committed = progress.committed,
                accepted = progress.accepted,
                "shutting down, waiting for {} / {}",
                progress.committed,
                progress.accepted
            );
            let wait = deadline.map_or(config.poll_interval, |deadline| {
                config.poll_interval.min(deadline - now)
            });
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that completes when shutdown is requested.
///
/// Created by [`ShutdownCoordinator::recv()`].
pub struct ShutdownReceiver {
    inner: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl std::fmt::Debug for ShutdownReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownReceiver").finish_non_exhaustive()
    }
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{Digester, Sha512Base64};
    use crate::engine::EngineConfig;
    use crate::error::{HashError, HashResult};

    #[derive(Debug)]
    struct FailOn(&'static str);

    impl Digester for FailOn {
        fn digest(&self, clear_value: &str) -> HashResult<String> {
            if clear_value == self.0 {
                Err(HashError::compute("refused"))
            } else {
                Sha512Base64.digest(clear_value)
            }
        }
    }

    fn engine(delay: Duration) -> HashEngine {
        HashEngine::new(EngineConfig::new().with_hash_delay(delay))
    }

    #[test]
    fn test_request_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.phase(), ShutdownPhase::Running);

        assert!(coordinator.request_shutdown());
        assert!(!coordinator.request_shutdown());
        assert!(!coordinator.clone().request_shutdown());

        assert_eq!(coordinator.phase(), ShutdownPhase::ShutdownRequested);
        assert!(coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_recv_completes_when_requested() {
        let coordinator = ShutdownCoordinator::new();
        let trigger = coordinator.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.request_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(1), coordinator.recv())
            .await
            .expect("recv should complete");
    }

    #[tokio::test]
    async fn test_recv_completes_immediately_if_requested() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();

        tokio::time::timeout(Duration::from_millis(10), coordinator.recv())
            .await
            .expect("recv should complete immediately");
    }

    #[tokio::test]
    async fn test_drain_with_nothing_outstanding() {
        let coordinator = ShutdownCoordinator::new();
        let report = coordinator
            .drain(&engine(Duration::from_secs(5)), DrainConfig::default())
            .await;

        assert!(report.is_clean());
        assert_eq!(report.progress, DrainProgress::default());
        assert_eq!(coordinator.phase(), ShutdownPhase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_delayed_workers() {
        let engine = engine(Duration::from_secs(5));
        for value in ["a", "b", "c"] {
            engine.submit(value).unwrap();
        }

        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();
        let report = coordinator.drain(&engine, DrainConfig::default()).await;

        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.progress.accepted, 3);
        assert_eq!(report.progress.committed, 3);
        assert!(report.elapsed >= Duration::from_secs(5));
        assert!(report.elapsed <= Duration::from_secs(6));
        assert!(engine.fetch(3).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_and_reports_abandoned() {
        let engine = engine(Duration::from_secs(30));
        engine.submit("a").unwrap();
        engine.submit("b").unwrap();

        let coordinator = ShutdownCoordinator::new();
        let report = coordinator
            .drain(
                &engine,
                DrainConfig::new(Duration::from_secs(1), Duration::from_millis(2500)),
            )
            .await;

        assert_eq!(report.outcome, DrainOutcome::TimedOut);
        assert_eq!(report.abandoned, vec![1, 2]);
        assert_eq!(report.progress.outstanding(), 2);
        assert!(report.elapsed >= Duration::from_millis(2500));
        assert!(report.elapsed < Duration::from_secs(3));
        assert_eq!(coordinator.phase(), ShutdownPhase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_settles_with_failed_worker() {
        let engine = HashEngine::with_digester(
            EngineConfig::new().with_hash_delay(Duration::from_secs(5)),
            FailOn("bad"),
        );
        engine.submit("good").unwrap();
        let bad = engine.submit("bad").unwrap();

        let report = ShutdownCoordinator::new()
            .drain(&engine, DrainConfig::default())
            .await;

        assert_eq!(report.outcome, DrainOutcome::Incomplete);
        assert!(!report.is_clean());
        assert_eq!(report.progress.committed, 1);
        assert_eq!(report.progress.failed, 1);
        assert_eq!(engine.fetch(bad), Err(HashError::NotReady(bad)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_with_unbounded_timeout_still_waits() {
        let engine = engine(Duration::from_secs(2));
        engine.submit("a").unwrap();

        let report = ShutdownCoordinator::new()
            .drain(
                &engine,
                DrainConfig::new(Duration::from_millis(5), Duration::MAX),
            )
            .await;

        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.progress.committed, 1);
        assert!(report.elapsed >= Duration::from_secs(2));

        let report = ShutdownCoordinator::new()
            .drain(
                &engine,
                DrainConfig::new(Duration::from_millis(5), Duration::from_secs(u64::MAX)),
            )
            .await;
        assert!(report.is_clean());
    }

    #[test]
    fn test_progress_arithmetic() {
        let progress = DrainProgress {
            accepted: 5,
            committed: 3,
            failed: 1,
        };
        assert_eq!(progress.settled(), 4);
        assert_eq!(progress.outstanding(), 1);
        assert!(!progress.is_settled());
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(ShutdownPhase::Running.as_str(), "running");
        assert_eq!(
            serde_json::to_string(&ShutdownPhase::ShutdownRequested).unwrap(),
            "\"shutdown_requested\""
        );
    }
}
