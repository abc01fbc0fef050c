//! The shared hashing engine handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hashd_tasks::{Spawner, SpawnerConfig, TaskId};
use tracing::{debug, error};

use crate::allocator::IdAllocator;
use crate::digest::{Digester, Sha512Base64};
use crate::error::{HashError, HashResult};
use crate::metrics::{self, InFlightWorker, Phase, ProcessingMetrics, StatsSnapshot};
use crate::shutdown::DrainProgress;
use crate::store::ResultStore;
use crate::worker::{self, SubmittedRequest};
use crate::RequestId;

/// Default delay before a submission's digest is computed.
pub const DEFAULT_HASH_DELAY: Duration = Duration::from_secs(5);

/// Default time finished workers stay visible in the task registry.
pub const DEFAULT_WORKER_HISTORY: Duration = Duration::from_secs(60);

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay between accepting a submission and computing its digest.
    pub hash_delay: Duration,
    /// How long finished workers stay in the task registry.
    pub worker_history: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_delay: DEFAULT_HASH_DELAY,
            worker_history: DEFAULT_WORKER_HISTORY,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before hashing.
    pub fn with_hash_delay(mut self, delay: Duration) -> Self {
        self.hash_delay = delay;
        self
    }

    /// Sets how long finished workers stay in the task registry.
    pub fn with_worker_history(mut self, retention: Duration) -> Self {
        self.worker_history = retention;
        self
    }
}

/// State shared by the engine handle and every worker it spawns.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) hash_delay: Duration,
    pub(crate) allocator: IdAllocator,
    pub(crate) store: ResultStore,
    pub(crate) metrics: ProcessingMetrics,
    pub(crate) digester: Box<dyn Digester>,
    spawner: Spawner,
    spawn_failures: AtomicU64,
}

/// Handle to the hashing engine.
///
/// Construct one at startup and clone it wherever it is needed; all clones
/// share the same allocator, store, metrics and worker registry. State lives
/// as long as the last clone.
///
/// # Example
///
/// ```rust,no_run
/// use hashd_core::{EngineConfig, HashEngine, HashError};
///
/// # async fn demo() {
/// let engine = HashEngine::new(EngineConfig::default());
/// let id = engine.submit("angryMonkey").unwrap();
/// assert_eq!(engine.fetch(id), Err(HashError::NotReady(id)));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HashEngine {
    state: Arc<EngineState>,
}

impl HashEngine {
    /// Creates an engine using SHA-512 with base64 encoding.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_digester(config, Sha512Base64)
    }

    /// Creates an engine with a custom digest function.
    pub fn with_digester(config: EngineConfig, digester: impl Digester + 'static) -> Self {
        let spawner = Spawner::with_config(
            SpawnerConfig::new().with_history_retention(config.worker_history),
        );
        Self {
            state: Arc::new(EngineState {
                hash_delay: config.hash_delay,
                allocator: IdAllocator::new(),
                store: ResultStore::new(),
                metrics: ProcessingMetrics::new(),
                digester: Box::new(digester),
                spawner,
                spawn_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Configured delay before hashing.
    pub fn hash_delay(&self) -> Duration {
        self.state.hash_delay
    }

    /// Accepts `clear_value` for hashing and returns its identifier.
    ///
    /// Returns as soon as the worker is spawned; the digest becomes
    /// available after the configured delay. Time spent here counts toward
    /// the processing statistics even when the value is rejected.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn submit(&self, clear_value: &str) -> HashResult<RequestId> {
        let _timer = self.state.metrics.start_timer(Phase::Submission);

        if clear_value.is_empty() {
            return Err(self.rejected(HashError::InvalidInput));
        }

        let id = self.state.allocator.allocate();
        metrics::record_submission();

        let request = SubmittedRequest {
            id,
            clear_value: clear_value.to_owned(),
        };
        let state = Arc::clone(&self.state);
        let spawned = self
            .state
            .spawner
            .spawn(id, format!("hash-{id}"), async move {
                let _in_flight = InFlightWorker::new();
                worker::process(&state, request).await
            });

        if let Err(err) = spawned {
            self.state.spawn_failures.fetch_add(1, Ordering::AcqRel);
            metrics::record_worker_failure();
            error!(request_id = id, error = %err, "failed to start worker");
            return Err(HashError::Spawn {
                id,
                reason: err.to_string(),
            });
        }

        debug!(request_id = id, "submission accepted");
        Ok(id)
    }

    /// Rejects a submission the transport could not hand over, such as an
    /// oversized body.
    ///
    /// The rejection is timed and counted like an empty submission and
    /// `error` is returned for rendering. No identifier is allocated.
    pub fn reject_submission(&self, error: HashError) -> HashError {
        let _timer = self.state.metrics.start_timer(Phase::Submission);
        self.rejected(error)
    }

    fn rejected(&self, error: HashError) -> HashError {
        metrics::record_rejection();
        debug!(error = %error, "submission rejected");
        error
    }

    /// Returns the committed digest for `id`.
    ///
    /// Fails with [`HashError::NotReady`] while the identifier is issued but
    /// uncommitted, and with [`HashError::UnknownId`] if it was never issued.
    pub fn fetch(&self, id: RequestId) -> HashResult<String> {
        if let Some(digest) = self.state.store.get(id) {
            return Ok(digest);
        }
        if self.state.allocator.is_issued(id) {
            Err(HashError::NotReady(id))
        } else {
            Err(HashError::unknown_id(id))
        }
    }

    /// Parses `raw` as an identifier and fetches it.
    pub fn fetch_str(&self, raw: &str) -> HashResult<String> {
        let id = raw
            .parse::<RequestId>()
            .map_err(|_| HashError::malformed_id(raw))?;
        self.fetch(id)
    }

    /// Current totals.
    pub fn stats(&self) -> StatsSnapshot {
        self.state.metrics.snapshot(self.state.allocator.issued())
    }

    /// Accepted, committed and failed counts.
    ///
    /// Settled counts are read before the accepted count, so a snapshot can
    /// under-report settled work but never over-report it.
    pub fn progress(&self) -> DrainProgress {
        let committed = self.state.store.committed();
        let failed = self.state.spawner.stats().total_failed()
            + self.state.spawn_failures.load(Ordering::Acquire);
        let accepted = self.state.allocator.issued();
        DrainProgress {
            accepted,
            committed,
            failed,
        }
    }

    /// Identifiers whose workers have not finished, in ascending order.
    pub fn in_flight(&self) -> Vec<RequestId> {
        self.state
            .spawner
            .in_flight()
            .into_iter()
            .map(TaskId::as_u64)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use ::metrics::{
        Counter, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString,
        Unit,
    };

    const ANGRY_MONKEY: &str =
        "ZEHhWB65gUlzdVwtDQArEyx+KVLzp/aTaRaPlBzYRIFj6vjFdqEb0Q5B8zVKCZ0vKbZPZklJz0Fd7su2A+gf7Q==";

    #[derive(Debug)]
    struct RejectingDigester;

    impl Digester for RejectingDigester {
        fn digest(&self, clear_value: &str) -> HashResult<String> {
            if clear_value == "boom" {
                Err(HashError::compute("refused"))
            } else {
                Sha512Base64.digest(clear_value)
            }
        }
    }

    fn engine(delay: Duration) -> HashEngine {
        HashEngine::new(EngineConfig::new().with_hash_delay(delay))
    }

    #[tokio::test]
    async fn test_stats_before_any_submission() {
        let engine = engine(DEFAULT_HASH_DELAY);
        assert_eq!(engine.stats(), StatsSnapshot { total: 0, average: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_submission_lifecycle() {
        let engine = engine(DEFAULT_HASH_DELAY);

        let id = engine.submit("angryMonkey").unwrap();
        assert_eq!(id, 1);
        assert_eq!(engine.fetch(1), Err(HashError::NotReady(1)));

        tokio::time::sleep(DEFAULT_HASH_DELAY - Duration::from_millis(1)).await;
        assert_eq!(engine.fetch(1), Err(HashError::NotReady(1)));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(engine.fetch(1).unwrap(), ANGRY_MONKEY);
        assert_eq!(engine.fetch(1).unwrap(), ANGRY_MONKEY);
        assert_eq!(engine.fetch_str("1").unwrap(), ANGRY_MONKEY);
    }

    #[tokio::test]
    async fn test_empty_submission_rejected() {
        let engine = engine(Duration::from_millis(10));

        assert_eq!(engine.submit(""), Err(HashError::InvalidInput));
        assert_eq!(engine.stats().total, 0);
        assert_eq!(engine.progress(), DrainProgress::default());

        assert_eq!(engine.submit("a").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let engine = engine(Duration::from_millis(10));
        engine.submit("a").unwrap();

        assert_eq!(engine.fetch(0), Err(HashError::unknown_id(0)));
        assert_eq!(engine.fetch(2), Err(HashError::unknown_id(2)));
        assert_eq!(engine.fetch_str("two"), Err(HashError::malformed_id("two")));
        assert_eq!(engine.fetch_str("-1"), Err(HashError::malformed_id("-1")));
        assert_eq!(engine.fetch_str(""), Err(HashError::malformed_id("")));
    }

    #[tokio::test]
    async fn test_stats_after_completion() {
        let engine = engine(Duration::from_millis(20));
        for value in ["one", "two", "three"] {
            engine.submit(value).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;

        let progress = engine.progress();
        assert_eq!(progress.committed, 3);
        assert!(progress.is_settled());

        let stats = engine.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.average, engine.state.metrics.cumulative_micros() / 3);
    }

    /// Captures processing-duration samples by phase label.
    #[derive(Debug, Default)]
    struct PhaseRecorder {
        samples: Arc<Mutex<Vec<(String, f64)>>>,
    }

    struct PhaseHistogram {
        phase: String,
        samples: Arc<Mutex<Vec<(String, f64)>>>,
    }

    impl HistogramFn for PhaseHistogram {
        fn record(&self, value: f64) {
            self.samples
                .lock()
                .unwrap()
                .push((self.phase.clone(), value));
        }
    }

    impl Recorder for PhaseRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            assert_eq!(key.name(), metrics::names::PROCESSING_DURATION_SECONDS);
            let phase = key
                .labels()
                .find(|label| label.key() == "phase")
                .map(|label| label.value().to_owned())
                .unwrap_or_default();
            Histogram::from_arc(Arc::new(PhaseHistogram {
                phase,
                samples: Arc::clone(&self.samples),
            }))
        }
    }

    impl PhaseRecorder {
        fn phase_count(&self, phase: Phase) -> usize {
            self.samples
                .lock()
                .unwrap()
                .iter()
                .filter(|(label, _)| label == phase.as_str())
                .count()
        }
    }

    #[tokio::test]
    async fn test_rejected_submission_is_timed_but_not_counted() {
        let engine = engine(Duration::from_secs(60));
        let recorder = PhaseRecorder::default();

        ::metrics::with_local_recorder(&recorder, || {
            assert_eq!(engine.submit(""), Err(HashError::InvalidInput));
            let oversized = engine.reject_submission(HashError::PayloadTooLarge { limit: 8 });
            assert_eq!(oversized, HashError::PayloadTooLarge { limit: 8 });
        });

        assert_eq!(recorder.phase_count(Phase::Submission), 2);
        assert_eq!(recorder.phase_count(Phase::Compute), 0);
        assert_eq!(engine.stats(), StatsSnapshot { total: 0, average: 0 });
        assert_eq!(engine.progress(), DrainProgress::default());

        ::metrics::with_local_recorder(&recorder, || engine.submit("a").unwrap());
        assert_eq!(recorder.phase_count(Phase::Submission), 3);
        assert_eq!(engine.stats().total, 1);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_ids() {
        let engine = engine(Duration::from_millis(10));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.submit(&format!("value-{i}")).unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());

        tokio::time::sleep(Duration::from_millis(200)).await;
        for (i, id) in (1..=50).enumerate() {
            assert!(engine.fetch(id).is_ok(), "id {id} (#{i}) not committed");
        }
    }

    #[tokio::test]
    async fn test_failed_worker_never_commits() {
        let engine = HashEngine::with_digester(
            EngineConfig::new().with_hash_delay(Duration::from_millis(10)),
            RejectingDigester,
        );

        let bad = engine.submit("boom").unwrap();
        let good = engine.submit("fine").unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(engine.fetch(bad), Err(HashError::NotReady(bad)));
        assert!(engine.fetch(good).is_ok());

        let progress = engine.progress();
        assert_eq!(progress.accepted, 2);
        assert_eq!(progress.committed, 1);
        assert_eq!(progress.failed, 1);
        assert!(engine.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_lists_pending_workers() {
        let engine = engine(Duration::from_secs(10));
        engine.submit("a").unwrap();
        engine.submit("b").unwrap();
        tokio::task::yield_now().await;

        assert_eq!(engine.in_flight(), vec![1, 2]);
        assert_eq!(engine.progress().outstanding(), 2);
    }
}
