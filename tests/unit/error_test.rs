//! Tests for error types

use prometheus_task_scheduler::core::{PoolError, SchedulerError, TaskId};

#[test]
fn test_invalid_argument_error() {
    let err = SchedulerError::InvalidArgument("task name must not be empty".to_string());
    assert_eq!(format!("{}", err), "invalid argument: task name must not be empty");
}

#[test]
fn test_task_not_found_error() {
    let id = TaskId::new();
    let err = SchedulerError::TaskNotFound(id);
    assert_eq!(format!("{}", err), format!("task not found: {id}"));
}

#[test]
fn test_shut_down_error() {
    let err = SchedulerError::ShutDown;
    assert_eq!(format!("{}", err), "scheduler is shut down");
}

#[test]
fn test_pool_error_converts() {
    let err: SchedulerError = PoolError::Spawn("resource temporarily unavailable".to_string()).into();
    assert_eq!(
        format!("{}", err),
        "worker pool error: failed to spawn worker: resource temporarily unavailable"
    );
}
