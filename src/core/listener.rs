//! Lifecycle event listeners and their broadcast.
//!
//! A [`TaskListener`] is a bundle of optional closures, one per lifecycle
//! event. The [`EventNotifier`] calls every registered listener in
//! registration order on the thread that triggered the event. A panicking
//! hook is logged and skipped; delivery to the remaining listeners and the
//! scheduler's own state transition are unaffected.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::core::task::TaskSnapshot;

type SnapshotHook = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;
type FailureHook = Arc<dyn Fn(&TaskSnapshot, &str) + Send + Sync>;

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "error", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The task received a due time and entered the ready queue.
    Scheduled,
    /// The task was dispatched to a worker.
    Started,
    /// An attempt succeeded.
    Completed,
    /// An attempt failed with the given error.
    Failed(String),
    /// The task was cancelled.
    Cancelled,
}

impl TaskEvent {
    /// Short lowercase name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Set of callbacks invoked on task lifecycle events.
///
/// ```rust,ignore
/// let listener = TaskListener::new()
///     .on_started(|task| tracing::info!(task = %task.name, "started"))
///     .on_failed(|task, error| tracing::warn!(task = %task.name, %error, "failed"));
/// scheduler.add_listener(listener);
/// ```
#[derive(Clone, Default)]
pub struct TaskListener {
    scheduled: Option<SnapshotHook>,
    started: Option<SnapshotHook>,
    completed: Option<SnapshotHook>,
    failed: Option<FailureHook>,
    cancelled: Option<SnapshotHook>,
}

impl TaskListener {
    /// Listener with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener routing all five events through one closure.
    #[must_use]
    pub fn from_fn<F>(hook: F) -> Self
    where
        F: Fn(&TaskEvent, &TaskSnapshot) + Send + Sync + 'static,
    {
        let hook = Arc::new(hook);
        let on = |event: TaskEvent| {
            let hook = Arc::clone(&hook);
            let wrapped: SnapshotHook = Arc::new(move |task: &TaskSnapshot| hook(&event, task));
            wrapped
        };
        let failed: FailureHook = {
            let hook = Arc::clone(&hook);
            Arc::new(move |task: &TaskSnapshot, err: &str| hook(&TaskEvent::Failed(err.to_owned()), task))
        };
        Self {
            scheduled: Some(on(TaskEvent::Scheduled)),
            started: Some(on(TaskEvent::Started)),
            completed: Some(on(TaskEvent::Completed)),
            failed: Some(failed),
            cancelled: Some(on(TaskEvent::Cancelled)),
        }
    }

    /// Called when a task enters the ready queue.
    #[must_use]
    pub fn on_scheduled(mut self, hook: impl Fn(&TaskSnapshot) + Send + Sync + 'static) -> Self {
        self.scheduled = Some(Arc::new(hook));
        self
    }

    /// Called when a task is dispatched.
    #[must_use]
    pub fn on_started(mut self, hook: impl Fn(&TaskSnapshot) + Send + Sync + 'static) -> Self {
        self.started = Some(Arc::new(hook));
        self
    }

    /// Called when an attempt succeeds.
    #[must_use]
    pub fn on_completed(mut self, hook: impl Fn(&TaskSnapshot) + Send + Sync + 'static) -> Self {
        self.completed = Some(Arc::new(hook));
        self
    }

    /// Called when an attempt fails.
    #[must_use]
    pub fn on_failed(mut self, hook: impl Fn(&TaskSnapshot, &str) + Send + Sync + 'static) -> Self {
        self.failed = Some(Arc::new(hook));
        self
    }

    /// Called when a task is cancelled.
    #[must_use]
    pub fn on_cancelled(mut self, hook: impl Fn(&TaskSnapshot) + Send + Sync + 'static) -> Self {
        self.cancelled = Some(Arc::new(hook));
        self
    }

    fn dispatch(&self, event: &TaskEvent, task: &TaskSnapshot) {
        match event {
            TaskEvent::Scheduled => call(self.scheduled.as_ref(), task),
            TaskEvent::Started => call(self.started.as_ref(), task),
            TaskEvent::Completed => call(self.completed.as_ref(), task),
            TaskEvent::Failed(err) => {
                if let Some(hook) = &self.failed {
                    hook(task, err);
                }
            }
            TaskEvent::Cancelled => call(self.cancelled.as_ref(), task),
        }
    }
}

fn call(hook: Option<&SnapshotHook>, task: &TaskSnapshot) {
    if let Some(hook) = hook {
        hook(task);
    }
}

impl fmt::Debug for TaskListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskListener")
            .field("scheduled", &self.scheduled.is_some())
            .field("started", &self.started.is_some())
            .field("completed", &self.completed.is_some())
            .field("failed", &self.failed.is_some())
            .field("cancelled", &self.cancelled.is_some())
            .finish()
    }
}

/// Handle returned on registration, used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered registry of listeners.
#[derive(Debug, Default)]
pub struct EventNotifier {
    listeners: RwLock<Vec<(ListenerId, TaskListener)>>,
    next_id: AtomicU64,
}

impl EventNotifier {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; it receives events after all earlier ones.
    pub fn add(&self, listener: TaskListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `event` to every listener, isolating panics.
    ///
    /// The registry lock is released before any hook runs, so hooks may
    /// register or remove listeners and query the scheduler.
    pub fn notify(&self, event: &TaskEvent, task: &TaskSnapshot) {
        let listeners: Vec<TaskListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in &listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.dispatch(event, task))) {
                error!(
                    task_id = %task.id,
                    event = event.name(),
                    error = %panic_message(payload.as_ref()),
                    "Task listener panicked"
                );
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
