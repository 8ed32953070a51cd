//! Bounded worker pool of dedicated OS threads.
//!
//! The pool keeps `core_size` workers alive and grows toward `max_size` while
//! submitted jobs outnumber idle workers. Workers above the core count exit
//! after sitting idle for `keep_alive`.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_task_scheduler::config::WorkerPoolConfig;
//! use prometheus_task_scheduler::core::WorkerPool;
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new().with_core_size(2).with_max_size(4),
//!     Arc::new(my_executor), // implements JobExecutor<MyJob>
//! )?;
//! pool.submit(job)?;
//! pool.shutdown(Duration::from_secs(5));
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub use native::WorkerPool;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    Spawn(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Spawn(msg) => write!(f, "failed to spawn worker: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live worker threads.
    pub worker_count: usize,

    /// Workers waiting for a job.
    pub idle_workers: usize,

    /// Jobs currently executing.
    pub active_jobs: u64,

    /// Jobs waiting in the channel.
    pub queued_jobs: u64,

    /// Jobs that finished executing.
    pub completed_jobs: u64,

    /// Jobs handed back unexecuted at shutdown.
    pub abandoned_jobs: u64,

    /// Jobs accepted by `submit`.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub live_workers: AtomicUsize,
    pub idle_workers: AtomicUsize,
    pub active_jobs: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub abandoned_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            worker_count: self.live_workers.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            abandoned_jobs: self.abandoned_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}
