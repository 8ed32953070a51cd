//! Scheduler configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::worker_pool::{WorkerPoolConfig, DEFAULT_STACK_SIZE};

/// Prefix of environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "TASK_SCHEDULER_";

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Clock loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Workers kept alive.
    pub core_pool_size: usize,
    /// Worker upper bound under backlog.
    pub max_pool_size: usize,
    /// Idle milliseconds before a surplus worker exits.
    pub keep_alive_ms: u64,
    /// Delay before a failed attempt is retried, in milliseconds.
    pub retry_delay_ms: u64,
    /// Bound on waiting for in-flight work during `stop()`, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
    /// Run the clock loop thread. When off, callers drive `tick()` themselves.
    pub auto_tick: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            core_pool_size: 5,
            max_pool_size: 10,
            keep_alive_ms: 60_000,
            retry_delay_ms: 30_000,
            shutdown_grace_ms: 30_000,
            thread_stack_size: DEFAULT_STACK_SIZE,
            auto_tick: true,
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock loop period.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = duration_ms(interval);
        self
    }

    /// Set core and maximum worker counts.
    #[must_use]
    pub const fn with_pool_size(mut self, core: usize, max: usize) -> Self {
        self.core_pool_size = core;
        self.max_pool_size = max;
        self
    }

    /// Size the worker pool from the available CPU cores.
    #[must_use]
    pub fn with_pool_sized_for_cpus(mut self) -> Self {
        let pool = WorkerPoolConfig::new().sized_for_cpus();
        self.core_pool_size = pool.core_size;
        self.max_pool_size = pool.max_size;
        self
    }

    /// Set the retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = duration_ms(grace);
        self
    }

    /// Enable or disable the clock loop thread.
    #[must_use]
    pub const fn with_auto_tick(mut self, auto_tick: bool) -> Self {
        self.auto_tick = auto_tick;
        self
    }

    /// Clock loop period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Retry delay.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Worker pool settings derived from this configuration.
    #[must_use]
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_core_size(self.core_pool_size)
            .with_max_size(self.max_pool_size)
            .with_keep_alive(Duration::from_millis(self.keep_alive_ms))
            .with_thread_stack_size(self.thread_stack_size)
    }

    /// Validate all values.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        self.worker_pool()
            .validate()
            .map_err(|e| format!("worker pool invalid: {e}"))
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns a message on malformed JSON or invalid values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `TASK_SCHEDULER_*` environment variables,
    /// loading a `.env` file first if one exists. Unset variables keep their
    /// default values. `TASK_SCHEDULER_POOL_SIZE_FOR_CPUS=true` sizes the pool
    /// from the CPU count before the explicit pool sizes apply.
    ///
    /// # Errors
    ///
    /// Returns a message when a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        let mut size_for_cpus = false;
        read_env("POOL_SIZE_FOR_CPUS", &mut size_for_cpus)?;
        if size_for_cpus {
            cfg = cfg.with_pool_sized_for_cpus();
        }
        read_env("TICK_INTERVAL_MS", &mut cfg.tick_interval_ms)?;
        read_env("CORE_POOL_SIZE", &mut cfg.core_pool_size)?;
        read_env("MAX_POOL_SIZE", &mut cfg.max_pool_size)?;
        read_env("KEEP_ALIVE_MS", &mut cfg.keep_alive_ms)?;
        read_env("RETRY_DELAY_MS", &mut cfg.retry_delay_ms)?;
        read_env("SHUTDOWN_GRACE_MS", &mut cfg.shutdown_grace_ms)?;
        read_env("THREAD_STACK_SIZE", &mut cfg.thread_stack_size)?;
        read_env("AUTO_TICK", &mut cfg.auto_tick)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_env<T>(name: &str, slot: &mut T) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    match std::env::var(&key) {
        Ok(raw) => {
            *slot = raw
                .trim()
                .parse()
                .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))?;
            Ok(())
        }
        Err(std::env::VarError::NotPresent) => Ok(()),
        Err(e) => Err(format!("{key}: {e}")),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
