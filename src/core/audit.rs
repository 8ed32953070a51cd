//! Audit sink implementations.
//!
//! An audit sink records task lifecycle events. [`audit_listener`] adapts any
//! sink into a [`TaskListener`] so it can be registered with the scheduler.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::listener::{TaskEvent, TaskListener};
use crate::core::task::{TaskId, TaskSnapshot};
use crate::util::clock::Clock;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Task name at the time of the event.
    pub task_name: String,
    /// Action taken (scheduled, started, completed, failed, cancelled).
    pub action: String,
    /// Time the event was recorded.
    pub created_at: DateTime<Utc>,
    /// Additional context, the error text for failures.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Stored events concerning one task, oldest first.
    #[must_use]
    pub fn events_for(&self, task_id: TaskId) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Helper to build an audit event from a lifecycle event.
#[must_use]
pub fn build_audit_event(event: &TaskEvent, task: &TaskSnapshot, at: DateTime<Utc>) -> AuditEvent {
    let payload = match event {
        TaskEvent::Failed(err) => Some(err.clone()),
        _ => None,
    };
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        task_id: task.id,
        task_name: task.name.clone(),
        action: event.name().to_owned(),
        created_at: at,
        payload,
    }
}

/// Listener that writes every lifecycle event into `sink`, stamped with
/// `clock`. Pass the scheduler's clock so audit times share its timeline.
pub fn audit_listener<S, C>(sink: Arc<Mutex<S>>, clock: C) -> TaskListener
where
    S: AuditSink + 'static,
    C: Clock + 'static,
{
    TaskListener::from_fn(move |event, task| {
        sink.lock().record(build_audit_event(event, task, clock.now()));
    })
}
