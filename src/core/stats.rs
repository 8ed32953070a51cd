//! Execution metrics and the statistics snapshot.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::task::{Task, TaskStatus};

/// Cumulative execution counters with an incrementally maintained mean.
///
/// Updated under the scheduler's state lock, so the counters and the mean
/// always describe the same set of attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutionMetrics {
    total: u64,
    succeeded: u64,
    failed: u64,
    average_ms: f64,
}

impl ExecutionMetrics {
    /// Fold one finished attempt into the counters.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.total += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        let sample = duration.as_secs_f64() * 1_000.0;
        self.average_ms += (sample - self.average_ms) / self.total as f64;
    }

    /// Attempts recorded.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Successful attempts.
    #[must_use]
    pub const fn succeeded(&self) -> u64 {
        self.succeeded
    }

    /// Failed attempts.
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.failed
    }

    /// Mean attempt duration in milliseconds.
    #[must_use]
    pub const fn average_ms(&self) -> f64 {
        self.average_ms
    }
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    /// Tasks known to the scheduler.
    pub total_tasks: usize,
    /// Tasks in `Pending`.
    pub pending: usize,
    /// Tasks in `Scheduled`.
    pub scheduled: usize,
    /// Tasks in `Running`.
    pub running: usize,
    /// Tasks in `Completed`.
    pub completed: usize,
    /// Tasks in `Failed`.
    pub failed: usize,
    /// Tasks in `Cancelled`.
    pub cancelled: usize,
    /// Tasks carrying a recurrence policy.
    pub recurring: usize,
    /// Attempts that reached a worker and finished.
    pub total_executions: u64,
    /// Attempts that succeeded.
    pub successful_executions: u64,
    /// Attempts that failed.
    pub failed_executions: u64,
    /// Mean attempt duration in milliseconds.
    pub average_execution_ms: f64,
    /// Workers currently executing a unit of work.
    pub active_workers: u64,
    /// Live worker threads.
    pub worker_threads: usize,
    /// Time since `start()`; zero if never started.
    pub uptime: Duration,
}

impl SchedulerStatistics {
    /// Count tasks by status and fold in the execution metrics.
    pub(crate) fn collect<'a>(tasks: impl Iterator<Item = &'a Task>, metrics: &ExecutionMetrics) -> Self {
        let mut stats = Self {
            total_executions: metrics.total(),
            successful_executions: metrics.succeeded(),
            failed_executions: metrics.failed(),
            average_execution_ms: metrics.average_ms(),
            ..Self::default()
        };
        for task in tasks {
            stats.total_tasks += 1;
            if task.recurrence().is_some() {
                stats.recurring += 1;
            }
            match task.status() {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Scheduled => stats.scheduled += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
