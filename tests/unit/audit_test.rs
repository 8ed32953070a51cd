//! Tests for audit sink

use chrono::Utc;
use prometheus_task_scheduler::core::{build_audit_event, AuditSink, InMemoryAuditSink, Task, TaskEvent};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let task = Task::new("task1", || Ok(())).snapshot();

    let event = build_audit_event(&TaskEvent::Scheduled, &task, Utc::now());
    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0], event);
    assert_eq!(events[0].task_id, task.id);
    assert_eq!(events[0].action, "scheduled");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let tasks: Vec<_> = ["task1", "task2", "task3"]
        .into_iter()
        .map(|name| Task::new(name, || Ok(())).snapshot())
        .collect();

    for task in &tasks {
        sink.record(build_audit_event(&TaskEvent::Started, task, Utc::now()));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_name, "task2"); // First one popped
    assert_eq!(events[1].task_name, "task3");
    assert!(sink.events_for(tasks[0].id).is_empty());
}

#[test]
fn test_build_audit_event() {
    let task = Task::new("task1", || Ok(())).snapshot();
    let at = Utc::now();
    let event = build_audit_event(&TaskEvent::Failed("timeout".to_string()), &task, at);

    assert!(!event.event_id.is_empty());
    assert_eq!(event.task_id, task.id);
    assert_eq!(event.task_name, "task1");
    assert_eq!(event.action, "failed");
    assert_eq!(event.payload, Some("timeout".to_string()));
    assert_eq!(event.created_at, at);
}
