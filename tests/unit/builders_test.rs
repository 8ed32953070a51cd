//! Tests for the scheduler builder

use chrono::Utc;
use prometheus_task_scheduler::builders::SchedulerBuilder;
use prometheus_task_scheduler::config::SchedulerConfig;
use prometheus_task_scheduler::core::{SchedulerError, TaskListener};
use prometheus_task_scheduler::util::ManualClock;
use std::time::Duration;

#[test]
fn test_build_scheduler_from_config() {
    let config = SchedulerConfig::new().with_pool_size(1, 2).with_auto_tick(false);
    let scheduler = SchedulerBuilder::new()
        .config(config.clone())
        .clock(ManualClock::new(Utc::now()))
        .listener(TaskListener::new())
        .build()
        .unwrap();
    assert_eq!(scheduler.config(), &config);
    assert!(!scheduler.is_running());
}

#[test]
fn test_build_rejects_invalid_config() {
    let config = SchedulerConfig::new().with_tick_interval(Duration::ZERO);
    let result = SchedulerBuilder::new().config(config).build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_started_scheduler_reports_pool() {
    let scheduler = SchedulerBuilder::new()
        .config(SchedulerConfig::new().with_pool_size(2, 3).with_auto_tick(false))
        .build()
        .unwrap();
    scheduler.start().unwrap();
    let stats = scheduler.pool_stats().unwrap();
    assert_eq!(stats.worker_count, 2);
    assert_eq!(scheduler.statistics().worker_threads, 2);
    assert!(scheduler.stop());
    assert!(scheduler.pool_stats().is_none());
}
