//! Tests for configuration validation

use prometheus_task_scheduler::config::{SchedulerConfig, WorkerPoolConfig};
use std::time::Duration;

#[test]
fn test_worker_pool_config_validation() {
    let valid = WorkerPoolConfig::new().with_core_size(2).with_max_size(4);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_worker_pool_config_invalid_core_size() {
    let invalid = WorkerPoolConfig::new().with_core_size(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_max_below_core() {
    let invalid = WorkerPoolConfig::new().with_core_size(8).with_max_size(4);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_sized_for_cpus() {
    let config = WorkerPoolConfig::new().with_core_size(1).with_max_size(1).sized_for_cpus();
    assert!(config.core_size >= 1);
    assert_eq!(config.max_size, config.core_size * 2);
    assert!(config.validate().is_ok());
}

#[test]
fn test_worker_pool_config_tiny_stack() {
    let invalid = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_validation() {
    let config = SchedulerConfig::new()
        .with_tick_interval(Duration::from_millis(250))
        .with_pool_size(2, 8);
    assert!(config.validate().is_ok());
    assert_eq!(config.worker_pool().core_size, 2);
}

#[test]
fn test_scheduler_config_zero_tick() {
    let config = SchedulerConfig {
        tick_interval_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "tick_interval_ms": 500,
        "core_pool_size": 2,
        "max_pool_size": 6,
        "retry_delay_ms": 1000,
        "auto_tick": false
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.tick_interval(), Duration::from_millis(500));
    assert_eq!(config.retry_delay(), Duration::from_secs(1));
    assert!(!config.auto_tick);
    // Unspecified fields keep their defaults
    assert_eq!(config.shutdown_grace_ms, SchedulerConfig::default().shutdown_grace_ms);
}

#[test]
fn test_scheduler_config_from_json_invalid() {
    let json = r#"{ "core_pool_size": 4, "max_pool_size": 2 }"#;
    assert!(SchedulerConfig::from_json_str(json).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}
