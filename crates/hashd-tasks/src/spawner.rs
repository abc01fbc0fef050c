//! Task spawner for tracked background execution.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::error::{TaskError, TaskResult};
use crate::task::{TaskId, TaskInfo, TaskStats, TaskStatus};

/// Configuration for the task spawner.
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    /// Registry size at which finished entries are first pruned on spawn.
    pub max_registry_size: usize,
    /// Whether finished tasks stay in the registry.
    pub track_history: bool,
    /// How long to keep finished tasks in the registry.
    pub history_retention: Duration,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            max_registry_size: 10_000,
            track_history: true,
            history_retention: Duration::from_secs(3600),
        }
    }
}

impl SpawnerConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry size that triggers pruning.
    pub fn with_max_registry_size(mut self, size: usize) -> Self {
        self.max_registry_size = size;
        self
    }

    /// Set history retention duration.
    pub fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = retention;
        self
    }

    /// Drop finished tasks from the registry as soon as they finish.
    pub fn without_history(mut self) -> Self {
        self.track_history = false;
        self
    }
}

/// Background task spawner with an explicit completion registry.
///
/// Every spawned task is registered under its [`TaskId`] before it starts
/// and stays registered at least until it finishes, so callers can always
/// enumerate the work that is still outstanding. Tasks are never cancelled:
/// once spawned they run to completion.
#[derive(Debug)]
pub struct Spawner {
    config: SpawnerConfig,
    registry: Arc<DashMap<TaskId, Arc<RwLock<TaskInfo>>>>,
    stats: Arc<TaskStats>,
    prune_at: AtomicUsize,
}

impl Spawner {
    /// Create a new spawner with default configuration.
    pub fn new() -> Self {
        Self::with_config(SpawnerConfig::default())
    }

    /// Create a new spawner with custom configuration.
    pub fn with_config(config: SpawnerConfig) -> Self {
        Self {
            prune_at: AtomicUsize::new(config.max_registry_size),
            config,
            registry: Arc::new(DashMap::new()),
            stats: Arc::new(TaskStats::new()),
        }
    }

    /// Get the current number of unfinished tasks.
    pub fn running_count(&self) -> u64 {
        self.stats.currently_running()
    }

    /// Get task statistics.
    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    /// Get task info by ID.
    pub fn get_task(&self, id: impl Into<TaskId>) -> Option<TaskInfo> {
        self.registry.get(&id.into()).map(|v| v.read().clone())
    }

    /// List all tracked tasks.
    pub fn list_tasks(&self) -> Vec<TaskInfo> {
        self.registry
            .iter()
            .map(|entry| entry.value().read().clone())
            .collect()
    }

    /// List tasks by status.
    pub fn list_tasks_by_status(&self, status: TaskStatus) -> Vec<TaskInfo> {
        self.registry
            .iter()
            .filter_map(|entry| {
                let info = entry.value().read();
                (info.status == status).then(|| info.clone())
            })
            .collect()
    }

    /// Identifiers of tasks that have not finished yet, in ascending order.
    pub fn in_flight(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .registry
            .iter()
            .filter(|entry| !entry.value().read().status.is_terminal())
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Spawn a tracked task under a caller-supplied identifier.
    ///
    /// The task's `Err` output marks it failed; a panic is caught and also
    /// marks it failed. Fails with [`TaskError::Duplicate`] if a task with
    /// the same identifier is still registered.
    pub fn spawn<F, E>(
        &self,
        id: impl Into<TaskId>,
        name: impl Into<String>,
        task: F,
    ) -> TaskResult<TaskId>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = id.into();
        let name = name.into();

        if self.registry.len() >= self.prune_threshold() {
            self.prune_finished();
        }

        let info = Arc::new(RwLock::new(TaskInfo::new(id, name.clone())));
        match self.registry.entry(id) {
            Entry::Occupied(_) => return Err(TaskError::duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(info.clone());
            }
        }

        self.stats.record_spawn();
        debug!(task_id = %id, task_name = %name, "spawning tracked task");

        let stats = self.stats.clone();
        let registry = self.registry.clone();
        let track_history = self.config.track_history;

        tokio::spawn(async move {
            info.write().mark_started();

            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    info.write().mark_completed();
                    stats.record_completed();
                    debug!(task_id = %id, "task completed");
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    warn!(task_id = %id, task_name = %name, error = %message, "task failed");
                    info.write().mark_failed(message);
                    stats.record_failed();
                }
                Err(payload) => {
                    let err = TaskError::panicked(panic_message(payload.as_ref()));
                    error!(task_id = %id, task_name = %name, error = %err, "task panicked");
                    info.write().mark_failed(err.to_string());
                    stats.record_failed();
                }
            }

            if !track_history {
                registry.remove(&id);
            }
        });

        Ok(id)
    }

    /// Registry size at which the next spawn prunes finished tasks.
    ///
    /// Starts at `max_registry_size`. After each prune it becomes twice the
    /// number of surviving entries, but never less than `max_registry_size`,
    /// so a registry full of live work is scanned once per doubling rather
    /// than on every spawn.
    pub fn prune_threshold(&self) -> usize {
        self.prune_at.load(Ordering::Acquire)
    }

    /// Remove finished tasks older than the retention period.
    ///
    /// Returns the number of entries removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.registry.len();
        let retention = chrono::Duration::from_std(self.config.history_retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = chrono::Utc::now();

        self.registry.retain(|_, info| {
            let info = info.read();
            match info.completed_at {
                Some(completed_at) if info.status.is_terminal() => now - completed_at < retention,
                _ => true,
            }
        });

        let remaining = self.registry.len();
        self.prune_at.store(
            remaining
                .saturating_mul(2)
                .max(self.config.max_registry_size),
            Ordering::Release,
        );

        before.saturating_sub(remaining)
    }
}

impl Default for Spawner {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
