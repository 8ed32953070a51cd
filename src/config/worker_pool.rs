//! Worker pool sizing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default stack size for worker threads (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Smallest stack size accepted for worker threads.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Workers started up front and kept for the pool's lifetime.
    pub core_size: usize,
    /// Upper bound on workers, reached only while jobs back up.
    pub max_size: usize,
    /// Idle time after which a worker above `core_size` exits.
    pub keep_alive: Duration,
    /// Stack size of each worker thread.
    pub thread_stack_size: usize,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_size: 5,
            max_size: 10,
            keep_alive: Duration::from_secs(60),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "task-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of always-on workers.
    #[must_use]
    pub const fn with_core_size(mut self, core_size: usize) -> Self {
        self.core_size = core_size;
        self
    }

    /// Set the worker upper bound.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the idle time before surplus workers exit.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Size the pool from the available CPU cores: one core worker per core,
    /// up to two per core under backlog.
    #[must_use]
    pub fn sized_for_cpus(mut self) -> Self {
        let cpus = num_cpus::get().max(1);
        self.core_size = cpus;
        self.max_size = cpus * 2;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.core_size == 0 {
            return Err("core_size must be greater than 0".into());
        }
        if self.max_size < self.core_size {
            return Err(format!(
                "max_size ({}) must be at least core_size ({})",
                self.max_size, self.core_size
            ));
        }
        if self.keep_alive.is_zero() {
            return Err("keep_alive must be greater than 0".into());
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!("thread_stack_size must be at least {MIN_STACK_SIZE} bytes"));
        }
        Ok(())
    }
}
