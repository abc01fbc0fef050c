//! Task identity and status types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Identifier for a tracked task.
///
/// Task identifiers are supplied by the caller so that a task can be looked
/// up by the same key the rest of the system uses (for example a request id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a task ID from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the underlying value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Current status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is registered but has not been polled yet.
    Pending,
    /// Task is currently running.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task returned an error or panicked.
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the task is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the task is pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if the task succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the task failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Information about a task.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    /// Task identifier.
    pub id: TaskId,
    /// Human-readable task name.
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was registered.
    pub created_at: DateTime<Utc>,
    /// When the task started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Duration of execution (if finished).
    pub duration: Option<Duration>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl TaskInfo {
    /// Create new task info.
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            error: None,
        }
    }

    /// Mark as started.
    pub fn mark_started(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark as completed.
    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.finish();
    }

    /// Mark as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration = (now - started).to_std().ok();
        }
    }
}

/// Task execution statistics.
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Total tasks spawned.
    pub spawned: AtomicU64,
    /// Tasks completed successfully.
    pub completed: AtomicU64,
    /// Tasks that failed.
    pub failed: AtomicU64,
    /// Currently running tasks.
    pub running: AtomicU64,
}

impl TaskStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task spawn.
    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a task completion.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_sub(1, Ordering::AcqRel);
    }

    /// Record a task failure.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_sub(1, Ordering::AcqRel);
    }

    /// Get total spawned count.
    pub fn total_spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Get completed count.
    pub fn total_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get failed count.
    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Get currently running count.
    pub fn currently_running(&self) -> u64 {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId::new(42).to_string(), "42");
        assert_eq!(TaskId::from(42).as_u64(), 42);
    }

    #[test]
    fn test_task_id_ordering() {
        let mut ids = vec![TaskId::new(3), TaskId::new(1), TaskId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![TaskId::new(1), TaskId::new(2), TaskId::new(3)]);
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_task_info_lifecycle() {
        let mut info = TaskInfo::new(TaskId::new(1), "hash-1");

        assert!(info.status.is_pending());
        assert!(info.started_at.is_none());

        info.mark_started();
        assert!(info.status.is_running());
        assert!(info.started_at.is_some());

        info.mark_completed();
        assert!(info.status.is_success());
        assert!(info.completed_at.is_some());
        assert!(info.duration.is_some());
    }

    #[test]
    fn test_task_info_failure() {
        let mut info = TaskInfo::new(TaskId::new(2), "hash-2");
        info.mark_started();
        info.mark_failed("digest unavailable");

        assert!(info.status.is_failure());
        assert_eq!(info.error.as_deref(), Some("digest unavailable"));
    }

    #[test]
    fn test_task_stats() {
        let stats = TaskStats::new();

        stats.record_spawn();
        stats.record_spawn();
        assert_eq!(stats.total_spawned(), 2);
        assert_eq!(stats.currently_running(), 2);

        stats.record_completed();
        stats.record_failed();
        assert_eq!(stats.total_completed(), 1);
        assert_eq!(stats.total_failed(), 1);
        assert_eq!(stats.currently_running(), 0);
    }
}
