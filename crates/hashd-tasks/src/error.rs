//! Error types for background task operations.

use thiserror::Error;

use crate::task::TaskId;

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors that can occur during task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A task with this identifier is already tracked.
    #[error("task already registered: {0}")]
    Duplicate(TaskId),

    /// Task panicked during execution.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Create a duplicate registration error.
    pub fn duplicate(id: impl Into<TaskId>) -> Self {
        Self::Duplicate(id.into())
    }

    /// Create a panicked error.
    pub fn panicked(reason: impl Into<String>) -> Self {
        Self::Panicked(reason.into())
    }
}
