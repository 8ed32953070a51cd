//! Core scheduling abstractions: tasks, recurrence, events, execution and the scheduler.

pub mod error;
pub mod task;
pub mod recurrence;
pub mod listener;
pub mod audit;
pub mod stats;
pub mod executor;
pub mod worker_pool;
pub mod scheduler;

pub use error::{AppResult, SchedulerError};
pub use task::{Task, TaskAction, TaskId, TaskSnapshot, TaskStatus, DEFAULT_MAX_RETRIES};
pub use recurrence::{RecurrencePattern, RecurrencePolicy, TimeUnit};
pub use listener::{EventNotifier, ListenerId, TaskEvent, TaskListener};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, audit_listener, build_audit_event};
pub use stats::{ExecutionMetrics, SchedulerStatistics};
pub use executor::JobExecutor;
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
pub use scheduler::TaskScheduler;
