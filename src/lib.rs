//! # Prometheus Task Scheduler
//!
//! An in-memory, priority-aware task scheduler for in-process background work.
//!
//! Callers submit units of work to run immediately, at an absolute time,
//! after a delay, or on a recurring schedule. A clock loop wakes on a fixed
//! tick, pulls every due task out of the ready queue in priority order and
//! hands it to an elastic pool of worker threads. Failed attempts are retried
//! after a fixed delay up to a per-task limit; recurring tasks are re-queued
//! until their policy runs out.
//!
//! ## Key Features
//!
//! - **Priority Dispatch**: Critical before High before Normal before Low, then earliest due first
//! - **Recurrence**: Fixed intervals plus hourly, daily, weekly and monthly calendar patterns
//! - **Bounded Retries**: A failing task runs at most `1 + max_retries` times
//! - **Elastic Worker Pool**: Core workers always alive, surplus workers spawned under backlog
//! - **Lifecycle Events**: Listeners observe scheduled, started, completed, failed and cancelled
//! - **Statistics**: Task counts by status, execution counters and mean duration
//! - **Injectable Clock**: Deterministic tests with `ManualClock` and a manually driven `tick()`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_task_scheduler::config::SchedulerConfig;
//! use prometheus_task_scheduler::core::{RecurrencePolicy, Task, TaskScheduler, TimeUnit};
//! use prometheus_task_scheduler::util::serde::Priority;
//!
//! prometheus_task_scheduler::util::init_tracing();
//! let scheduler = TaskScheduler::new(SchedulerConfig::from_env()?)?;
//! scheduler.start()?;
//!
//! scheduler.schedule_now(
//!     Task::new("flush-cache", || flush_cache()).with_priority(Priority::High),
//! )?;
//! scheduler.schedule_recurring(
//!     Task::new("heartbeat", || send_heartbeat())
//!         .with_recurrence(RecurrencePolicy::every(30, TimeUnit::Seconds).with_max_executions(10)),
//! )?;
//!
//! let stats = scheduler.statistics();
//! scheduler.stop();
//! ```
//!
//! For complete scenarios, see `tests/scheduler_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: tasks, recurrence, events and the scheduler.
pub mod core;
/// Configuration models for the scheduler and its worker pool.
pub mod config;
/// Builders to construct the scheduler from configuration.
pub mod builders;
/// Infrastructure backing the scheduler.
pub mod infra;
/// Shared utilities.
pub mod util;
