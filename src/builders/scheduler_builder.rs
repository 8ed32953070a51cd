//! Builder to construct a scheduler from configuration.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{SchedulerError, TaskListener, TaskScheduler};
use crate::util::clock::{Clock, SystemClock};

/// Assembles a [`TaskScheduler`] from configuration, a clock and listeners.
///
/// ```rust,ignore
/// let scheduler = TaskScheduler::builder()
///     .config(SchedulerConfig::from_env()?)
///     .listener(TaskListener::new().on_failed(|task, error| alert(task, error)))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    listeners: Vec<TaskListener>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    /// Default configuration on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            listeners: Vec::new(),
        }
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the current time from `clock`.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Register `listener` before the scheduler accepts any task.
    #[must_use]
    pub fn listener(mut self, listener: TaskListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration and build the scheduler. The scheduler is
    /// not started.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if validation fails.
    pub fn build(self) -> Result<TaskScheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;
        Ok(TaskScheduler::from_parts(self.config, self.clock, self.listeners))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_config() {
        let err = SchedulerBuilder::new()
            .config(SchedulerConfig::new().with_pool_size(4, 2))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn builds_stopped_scheduler() {
        let scheduler = SchedulerBuilder::new().listener(TaskListener::new()).build().unwrap();
        assert!(!scheduler.is_running());
        assert!(scheduler.pool_stats().is_none());
    }
}
