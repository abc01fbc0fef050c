//! # hashd tasks
//!
//! Tracked background execution for hashd.
//!
//! The [`Spawner`] runs detached futures on the tokio runtime and keeps an
//! explicit registry of every task it has started, keyed by a caller-chosen
//! [`TaskId`]. The registry is the source of truth for "what is still
//! running", which lets shutdown enumerate outstanding work instead of
//! inferring it from counters.
//!
//! ```rust,no_run
//! use hashd_tasks::{Spawner, SpawnerConfig, TaskStatus};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let spawner = Spawner::with_config(
//!         SpawnerConfig::new().with_history_retention(Duration::from_secs(600)),
//!     );
//!
//!     spawner
//!         .spawn(1, "hash-1", async {
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok::<(), std::io::Error>(())
//!         })
//!         .unwrap();
//!
//!     assert_eq!(spawner.in_flight().len(), 1);
//! }
//! ```
//!
//! Tasks cannot be cancelled. A task that returns `Err` or panics is marked
//! [`TaskStatus::Failed`] and logged; it is still counted as finished.

mod error;
mod spawner;
mod task;

pub use error::{TaskError, TaskResult};
pub use spawner::{Spawner, SpawnerConfig};
pub use task::{TaskId, TaskInfo, TaskStats, TaskStatus};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{TaskError, TaskResult};
    pub use crate::spawner::{Spawner, SpawnerConfig};
    pub use crate::task::{TaskId, TaskInfo, TaskStats, TaskStatus};
}
