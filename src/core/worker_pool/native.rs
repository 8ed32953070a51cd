//! Native implementation of `WorkerPool` using OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on channel `recv`; surplus workers use
//!   `recv_timeout` so they can retire after `keep_alive`
//! - **Lock-free fast path**: counters are atomics, the sender sits behind a
//!   brief mutex only so shutdown can drop it
//! - **Clean shutdown**: dropping the sender unblocks idle workers naturally;
//!   jobs still queued are handed back through `JobExecutor::abandon`

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::JobExecutor;
use crate::core::listener::panic_message;

use super::{PoolCounters, PoolError, PoolStats};

/// Whether a worker belongs to the permanent core or was added under load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerRole {
    Core,
    Surplus,
}

/// Worker pool with dedicated OS threads.
pub struct WorkerPool<J, E>
where
    J: Send + 'static,
    E: JobExecutor<J>,
{
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Job sender (to workers). Option allows clean shutdown by dropping.
    job_tx: Mutex<Option<Sender<J>>>,

    /// Receiver kept for spawning workers and draining on shutdown.
    job_rx: Receiver<J>,

    /// Runs and abandons jobs.
    executor: Arc<E>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Shutdown flag (lock-free atomic).
    shutdown: Arc<AtomicBool>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Worker ID counter, used for thread names.
    next_worker_id: AtomicUsize,
}

impl<J, E> WorkerPool<J, E>
where
    J: Send + 'static,
    E: JobExecutor<J>,
{
    /// Create a new worker pool and start `config.core_size` workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid and
    /// `PoolError::Spawn` if a core worker thread cannot be started.
    pub fn new(config: WorkerPoolConfig, executor: Arc<E>) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (job_tx, job_rx) = unbounded::<J>();
        let pool = Self {
            config,
            job_tx: Mutex::new(Some(job_tx)),
            job_rx,
            executor,
            counters: Arc::new(PoolCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
        };

        for _ in 0..pool.config.core_size {
            pool.counters.live_workers.fetch_add(1, Ordering::AcqRel);
            pool.spawn_worker(WorkerRole::Core)?;
        }

        info!(
            core_size = pool.config.core_size,
            max_size = pool.config.max_size,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(pool)
    }

    /// Hand a job to the pool. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolShutdown` if the pool has been shut down; the
    /// job has then already been passed to `JobExecutor::abandon`.
    pub fn submit(&self, job: J) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            self.abandon(job);
            return Err(PoolError::PoolShutdown);
        }

        {
            let tx_guard = self.job_tx.lock();
            let Some(job_tx) = tx_guard.as_ref() else {
                drop(tx_guard);
                self.abandon(job);
                return Err(PoolError::PoolShutdown);
            };

            self.counters.queued_jobs.fetch_add(1, Ordering::AcqRel);
            if let Err(crossbeam_channel::SendError(job)) = job_tx.send(job) {
                self.counters.queued_jobs.fetch_sub(1, Ordering::AcqRel);
                drop(tx_guard);
                self.abandon(job);
                return Err(PoolError::PoolShutdown);
            }
            self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
        }

        self.maybe_grow();
        Ok(())
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shut down the pool, waiting at most `grace` for running jobs.
    ///
    /// Queued jobs that have not started are abandoned. Returns `false` if
    /// some workers were still busy when `grace` ran out; those threads are
    /// detached and finish their current job in the background.
    pub fn shutdown(&self, grace: Duration) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return true;
        }

        info!("Shutting down worker pool");

        // Drop the sender to unblock all workers waiting on recv()
        *self.job_tx.lock() = None;
        self.drain_queued();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let worker_count = handles.len();

        let (done_tx, done_rx) = bounded::<usize>(1);
        let joiner = thread::Builder::new()
            .name(format!("{}-joiner", self.config.thread_name_prefix))
            .spawn(move || {
                let panicked = handles
                    .into_iter()
                    .filter_map(|handle| handle.join().err())
                    .count();
                let _ = done_tx.send(panicked);
            });
        if let Err(e) = joiner {
            warn!(error = %e, "Could not spawn joiner thread - detaching workers");
            return false;
        }

        match done_rx.recv_timeout(grace) {
            Ok(0) => {
                info!(worker_count = worker_count, "Worker pool shut down complete");
                true
            }
            Ok(panicked) => {
                warn!(worker_count = worker_count, panicked = panicked, "Worker pool shut down with panicked workers");
                true
            }
            Err(_) => {
                warn!(
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "Workers did not exit within grace period - detaching"
                );
                false
            }
        }
    }

    fn abandon(&self, job: J) {
        self.counters.abandoned_jobs.fetch_add(1, Ordering::Relaxed);
        self.executor.abandon(job);
    }

    fn drain_queued(&self) {
        for job in self.job_rx.try_iter() {
            self.counters.queued_jobs.fetch_sub(1, Ordering::AcqRel);
            self.abandon(job);
        }
    }

    /// Add a surplus worker when jobs are waiting and nobody is idle.
    fn maybe_grow(&self) {
        let queued = self.counters.queued_jobs.load(Ordering::Acquire);
        let idle = self.counters.idle_workers.load(Ordering::Acquire);
        if queued <= idle as u64 {
            return;
        }
        let max = self.config.max_size;
        let reserved = self
            .counters
            .live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| (live < max).then_some(live + 1))
            .is_ok();
        if reserved {
            if let Err(e) = self.spawn_worker(WorkerRole::Surplus) {
                warn!(error = %e, "Could not grow worker pool");
            }
        }
    }

    /// Spawn a worker. The caller has already counted it in `live_workers`.
    fn spawn_worker(&self, role: WorkerRole) -> Result<(), PoolError> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let ctx = WorkerContext {
            worker_id,
            role,
            job_rx: self.job_rx.clone(),
            executor: Arc::clone(&self.executor),
            counters: Arc::clone(&self.counters),
            shutdown: Arc::clone(&self.shutdown),
            keep_alive: self.config.keep_alive,
        };

        self.counters.idle_workers.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("{}-{worker_id}", self.config.thread_name_prefix))
            .stack_size(self.config.thread_stack_size)
            .spawn(move || ctx.run());

        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
                debug!(worker_id = worker_id, role = ?role, "Worker spawned");
                Ok(())
            }
            Err(e) => {
                self.counters.idle_workers.fetch_sub(1, Ordering::AcqRel);
                self.counters.live_workers.fetch_sub(1, Ordering::AcqRel);
                Err(PoolError::Spawn(e.to_string()))
            }
        }
    }
}

impl<J, E> Drop for WorkerPool<J, E>
where
    J: Send + 'static,
    E: JobExecutor<J>,
{
    fn drop(&mut self) {
        // Signal shutdown but DON'T join workers in Drop
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.job_tx.lock() = None;
            self.drain_queued();
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Everything a worker thread owns.
struct WorkerContext<J, E> {
    worker_id: usize,
    role: WorkerRole,
    job_rx: Receiver<J>,
    executor: Arc<E>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    keep_alive: Duration,
}

impl<J, E> WorkerContext<J, E>
where
    J: Send + 'static,
    E: JobExecutor<J>,
{
    fn run(self) {
        let worker_id = self.worker_id;
        debug!(worker_id = worker_id, "Worker thread started");

        loop {
            let job = match self.role {
                WorkerRole::Core => match self.job_rx.recv() {
                    Ok(job) => job,
                    Err(_) => break,
                },
                WorkerRole::Surplus => match self.job_rx.recv_timeout(self.keep_alive) {
                    Ok(job) => job,
                    Err(RecvTimeoutError::Timeout) => {
                        debug!(worker_id = worker_id, "Surplus worker idle past keep-alive, exiting");
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            self.counters.queued_jobs.fetch_sub(1, Ordering::AcqRel);
            self.counters.idle_workers.fetch_sub(1, Ordering::AcqRel);

            if self.shutdown.load(Ordering::Acquire) {
                self.counters.abandoned_jobs.fetch_add(1, Ordering::Relaxed);
                self.executor.abandon(job);
            } else {
                self.counters.active_jobs.fetch_add(1, Ordering::AcqRel);
                let executor = &self.executor;
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(job))) {
                    error!(
                        worker_id = worker_id,
                        error = %panic_message(payload.as_ref()),
                        "Job executor panicked"
                    );
                }
                self.counters.active_jobs.fetch_sub(1, Ordering::AcqRel);
                self.counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
            }

            self.counters.idle_workers.fetch_add(1, Ordering::AcqRel);
        }

        self.counters.idle_workers.fetch_sub(1, Ordering::AcqRel);
        self.counters.live_workers.fetch_sub(1, Ordering::AcqRel);
        debug!(worker_id = worker_id, "Worker thread exiting");
    }
}
