//! Tests for utility functions

use chrono::Utc;
use prometheus_task_scheduler::util::{add_std, Clock, ManualClock, Priority, SystemClock};
use std::time::Duration;

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_serde() {
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
    let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(parsed, Priority::Low);
}

#[test]
fn test_manual_clock_clones_share_time() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    let view = clock.clone();
    clock.advance(Duration::from_secs(5));
    assert_eq!(view.now(), add_std(start, Duration::from_secs(5)));
}

#[test]
fn test_system_clock_moves_forward() {
    let before = Utc::now();
    assert!(SystemClock.now() >= before);
}
