//! # hashd core
//!
//! The request-lifecycle engine behind hashd: a value is submitted, an
//! identifier comes back immediately, and the digest becomes fetchable
//! once a fixed delay has passed.
//!
//! - [`IdAllocator`] - gap-free, strictly increasing identifiers starting at 1
//! - [`ResultStore`] - write-once concurrent map of committed digests
//! - [`ProcessingMetrics`] - cumulative processing time and derived averages
//! - [`HashEngine`] - shared handle that ties the pieces together and spawns
//!   one tracked worker per submission
//! - [`ShutdownCoordinator`] - shutdown state machine with a bounded drain
//!
//! Processing time is the sum of two measured phases: the synchronous
//! submission path (including rejected submissions) and the worker's compute
//! step after the delay. The delay itself is never measured.

#![forbid(unsafe_code)]

mod allocator;
mod digest;
mod engine;
mod error;
pub mod metrics;
mod shutdown;
mod store;
mod worker;

/// Identifier issued for an accepted submission.
pub type RequestId = u64;

pub use allocator::IdAllocator;
pub use digest::{Digester, Sha512Base64};
pub use engine::{EngineConfig, HashEngine, DEFAULT_HASH_DELAY, DEFAULT_WORKER_HISTORY};
pub use error::{HashError, HashResult};
pub use metrics::{Phase, ProcessingMetrics, StatsSnapshot, Stopwatch};
pub use shutdown::{
    DrainConfig, DrainOutcome, DrainProgress, DrainReport, ShutdownCoordinator, ShutdownPhase,
    ShutdownReceiver, DEFAULT_DRAIN_POLL_INTERVAL, DEFAULT_DRAIN_TIMEOUT,
};
pub use store::ResultStore;
