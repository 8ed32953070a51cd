//! Task model: identity, priority, lifecycle status and execution bookkeeping.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::AppResult;
use crate::core::recurrence::RecurrencePolicy;
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::Priority;

/// Retries granted to a task that does not set its own bound.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The unit of work carried by a task.
///
/// Invoked at most once per execution attempt and never concurrently with
/// itself. Returning `Err` marks the attempt as failed.
pub type TaskAction = Box<dyn FnMut() -> AppResult<()> + Send + 'static>;

/// Opaque unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, no due time yet.
    Pending,
    /// Waiting in the ready queue for its due time.
    Scheduled,
    /// Claimed by a worker.
    Running,
    /// Last attempt succeeded and nothing further is planned.
    Completed,
    /// Last attempt failed and no retries remain.
    Failed,
    /// Cancelled explicitly or by recurrence exhaustion.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions can leave this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A schedulable unit of work.
///
/// Build with [`Task::new`] and the `with_*` methods, then hand it to one of
/// the scheduler's enqueue operations. The scheduler owns the task from then
/// on; callers observe it through [`TaskSnapshot`]s.
pub struct Task {
    id: TaskId,
    name: String,
    description: String,
    priority: Priority,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    sequence: u64,
    scheduled_at: Option<DateTime<Utc>>,
    last_execution: Option<DateTime<Utc>>,
    next_execution: Option<DateTime<Utc>>,
    execution_count: u32,
    last_error: Option<String>,
    last_duration: Option<Duration>,
    retry_count: u32,
    max_retries: u32,
    recurrence: Option<RecurrencePolicy>,
    action: Option<TaskAction>,
}

impl Task {
    /// Create a pending task with normal priority.
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnMut() -> AppResult<()> + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            name: name.into(),
            description: String::new(),
            priority: Priority::Normal,
            status: TaskStatus::Pending,
            created_at: SystemClock.now(),
            sequence: 0,
            scheduled_at: None,
            last_execution: None,
            next_execution: None,
            execution_count: 0,
            last_error: None,
            last_duration: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            recurrence: None,
            action: Some(Box::new(action)),
        }
    }

    /// Set the free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set how many times a failed attempt is retried.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach a recurrence policy, making this a recurring task.
    #[must_use]
    pub fn with_recurrence(mut self, policy: RecurrencePolicy) -> Self {
        self.recurrence = Some(policy);
        self
    }

    /// First due time used when the task is scheduled as recurring.
    #[must_use]
    pub const fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_execution = Some(at);
        self
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Attached recurrence policy, if any.
    #[must_use]
    pub const fn recurrence(&self) -> Option<&RecurrencePolicy> {
        self.recurrence.as_ref()
    }

    /// Due time requested via [`Task::starting_at`] or set by the scheduler.
    #[must_use]
    pub const fn next_execution(&self) -> Option<DateTime<Utc>> {
        self.next_execution
    }

    /// Copy of every observable field.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            last_execution: self.last_execution,
            next_execution: self.next_execution,
            execution_count: self.execution_count,
            last_error: self.last_error.clone(),
            last_duration: self.last_duration,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            recurrence: self.recurrence.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".into());
        }
        if self.status != TaskStatus::Pending {
            return Err(format!("task {} is {}, expected pending", self.id, self.status));
        }
        if self.action.is_none() {
            return Err(format!("task {} has no unit of work", self.id));
        }
        if let Some(policy) = &self.recurrence {
            policy.validate()?;
        }
        Ok(())
    }

    /// Creation time; replaced by the scheduler clock when accepted.
    pub(crate) const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Stamp acceptance by the scheduler.
    pub(crate) const fn accept(&mut self, at: DateTime<Utc>, sequence: u64) {
        self.created_at = at;
        self.sequence = sequence;
    }

    pub(crate) const fn recurrence_mut(&mut self) -> Option<&mut RecurrencePolicy> {
        self.recurrence.as_mut()
    }

    pub(crate) const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub(crate) const fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// Give the task a due time; status becomes `Scheduled`.
    pub(crate) fn mark_scheduled(&mut self, due: DateTime<Utc>) {
        self.status = TaskStatus::Scheduled;
        self.scheduled_at = Some(due);
        self.next_execution = Some(due);
    }

    /// Claim the task for a worker. Returns the action to run.
    pub(crate) fn claim(&mut self) -> Option<TaskAction> {
        let action = self.action.take()?;
        self.status = TaskStatus::Running;
        Some(action)
    }

    /// Hand the action back after an attempt, or after an abandoned dispatch.
    pub(crate) fn restore_action(&mut self, action: TaskAction) {
        self.action = Some(action);
    }

    /// Bookkeeping common to every attempt that reached a worker.
    pub(crate) fn record_attempt(&mut self, at: DateTime<Utc>, duration: Duration) {
        self.execution_count = self.execution_count.saturating_add(1);
        self.last_execution = Some(at);
        self.last_duration = Some(duration);
    }

    pub(crate) fn record_success(&mut self) {
        self.last_error = None;
        self.retry_count = 0;
        if self.status != TaskStatus::Cancelled {
            self.status = TaskStatus::Completed;
            self.next_execution = None;
        }
    }

    pub(crate) fn record_failure(&mut self, error: String) {
        self.last_error = Some(error);
        if self.status != TaskStatus::Cancelled {
            self.status = TaskStatus::Failed;
            self.next_execution = None;
        }
    }

    pub(crate) const fn increment_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.next_execution = None;
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("next_execution", &self.next_execution)
            .field("execution_count", &self.execution_count)
            .field("retry_count", &self.retry_count)
            .field("recurrence", &self.recurrence)
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a task, minus its unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Priority.
    pub priority: Priority,
    /// Status at the time of the snapshot.
    pub status: TaskStatus,
    /// Time the scheduler accepted the task, read from its clock.
    pub created_at: DateTime<Utc>,
    /// Due time most recently assigned.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Start of the most recent attempt's bookkeeping.
    pub last_execution: Option<DateTime<Utc>>,
    /// Upcoming due time, if any.
    pub next_execution: Option<DateTime<Utc>>,
    /// Attempts that reached a worker.
    pub execution_count: u32,
    /// Error from the most recent failed attempt; cleared on success.
    pub last_error: Option<String>,
    /// Duration of the most recent attempt.
    pub last_duration: Option<Duration>,
    /// Retries scheduled since the last success.
    pub retry_count: u32,
    /// Retry bound.
    pub max_retries: u32,
    /// Recurrence policy, if any.
    pub recurrence: Option<RecurrencePolicy>,
}

impl TaskSnapshot {
    /// Whether the task carries a recurrence policy.
    #[must_use]
    pub const fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}
