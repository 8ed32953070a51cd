//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::task::TaskId;
use crate::core::worker_pool::PoolError;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A task with this id is already known to the scheduler.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),
    /// No task with this id is known to the scheduler.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// The scheduler has been stopped.
    #[error("scheduler is shut down")]
    ShutDown,
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The worker pool could not be started or used.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Units of work return this; the error's display text becomes the task's
/// last error.
pub type AppResult<T> = Result<T, anyhow::Error>;
