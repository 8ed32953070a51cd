//! Integration tests for WorkerPool
//!
//! These tests validate real-world functionality including:
//! - Job execution with real executors
//! - Concurrent submission from many threads
//! - Elastic growth toward max_size and the concurrency bound
//! - Graceful shutdown and abandonment of queued jobs

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use prometheus_task_scheduler::config::WorkerPoolConfig;
use prometheus_task_scheduler::core::{JobExecutor, PoolError, WorkerPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// TEST EXECUTORS - Real implementations for testing
// ============================================================================

/// Executor that tracks execution count and peak concurrency
#[derive(Default)]
struct CountingExecutor {
    execution_count: AtomicU64,
    concurrent_count: AtomicU64,
    max_concurrent: AtomicU64,
    abandoned: Mutex<Vec<u64>>,
    work: Duration,
}

impl CountingExecutor {
    fn with_work(work: Duration) -> Self {
        Self {
            work,
            ..Self::default()
        }
    }

    fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::SeqCst)
    }

    fn max_concurrent(&self) -> u64 {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl JobExecutor<u64> for CountingExecutor {
    fn execute(&self, _job: u64) {
        // Track concurrent executions
        let current = self.concurrent_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        thread::sleep(self.work);

        self.concurrent_count.fetch_sub(1, Ordering::SeqCst);
        self.execution_count.fetch_add(1, Ordering::SeqCst);
    }

    fn abandon(&self, job: u64) {
        self.abandoned.lock().push(job);
    }
}

/// Executor that blocks each job until the test releases it
struct GateExecutor {
    entered: Sender<u64>,
    release: Receiver<()>,
    finished: AtomicU64,
}

impl JobExecutor<u64> for GateExecutor {
    fn execute(&self, job: u64) {
        let _ = self.entered.send(job);
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn abandon(&self, _job: u64) {}
}

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn config(core: usize, max: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new()
        .with_core_size(core)
        .with_max_size(max)
        .with_keep_alive(Duration::from_millis(200))
}

// ============================================================================
// BASIC EXECUTION
// ============================================================================

#[test]
fn test_every_submitted_job_runs_once() {
    let executor = Arc::new(CountingExecutor::default());
    let pool = WorkerPool::new(config(2, 4), Arc::clone(&executor)).unwrap();

    for job in 0..100 {
        pool.submit(job).unwrap();
    }

    assert!(wait_for(Duration::from_secs(5), || executor.execution_count() == 100));
    let stats = pool.stats();
    assert_eq!(stats.submitted_jobs, 100);
    assert!(pool.shutdown(Duration::from_secs(5)));
    assert_eq!(pool.stats().completed_jobs, 100);
    assert!(executor.abandoned.lock().is_empty());
}

#[test]
fn test_concurrent_submission() {
    let executor = Arc::new(CountingExecutor::with_work(Duration::from_millis(1)));
    let pool = Arc::new(WorkerPool::new(config(4, 8), Arc::clone(&executor)).unwrap());

    let submitters: Vec<_> = (0..8)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for n in 0..50 {
                    pool.submit(t * 1_000 + n).unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert!(wait_for(Duration::from_secs(10), || executor.execution_count() == 400));
    assert!(pool.shutdown(Duration::from_secs(5)));
}

// ============================================================================
// ELASTIC SIZING
// ============================================================================

#[test]
fn test_concurrency_never_exceeds_max_size() {
    let executor = Arc::new(CountingExecutor::with_work(Duration::from_millis(20)));
    let pool = WorkerPool::new(config(1, 3), Arc::clone(&executor)).unwrap();

    for job in 0..30 {
        pool.submit(job).unwrap();
    }

    assert!(wait_for(Duration::from_secs(10), || executor.execution_count() == 30));
    assert!(executor.max_concurrent() <= 3);
    assert!(executor.max_concurrent() >= 2, "pool did not grow under backlog");
    assert!(pool.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_surplus_workers_retire_after_keep_alive() {
    let executor = Arc::new(CountingExecutor::with_work(Duration::from_millis(20)));
    let pool = WorkerPool::new(config(1, 4), Arc::clone(&executor)).unwrap();

    for job in 0..20 {
        pool.submit(job).unwrap();
    }
    assert!(wait_for(Duration::from_secs(10), || executor.execution_count() == 20));
    assert!(wait_for(Duration::from_secs(5), || pool.stats().worker_count == 1));
    assert!(pool.shutdown(Duration::from_secs(5)));
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_abandons_queued_jobs() {
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let executor = Arc::new(GateExecutor {
        entered: entered_tx,
        release: release_rx,
        finished: AtomicU64::new(0),
    });
    let pool = Arc::new(WorkerPool::new(config(1, 1), Arc::clone(&executor)).unwrap());

    for job in 0..5 {
        pool.submit(job).unwrap();
    }
    assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

    let stopper = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.shutdown(Duration::from_secs(5)))
    };
    assert!(wait_for(Duration::from_secs(5), || pool.stats().abandoned_jobs == 4));
    release_tx.send(()).unwrap();

    assert!(stopper.join().unwrap());
    assert_eq!(executor.finished.load(Ordering::SeqCst), 1);
    assert!(pool.is_shutdown());
}

#[test]
fn test_shutdown_times_out_on_stuck_worker() {
    let (entered_tx, entered_rx) = unbounded();
    let (_release_tx, release_rx) = unbounded::<()>();
    let executor = Arc::new(GateExecutor {
        entered: entered_tx,
        release: release_rx,
        finished: AtomicU64::new(0),
    });
    let pool = WorkerPool::new(config(1, 1), executor).unwrap();

    pool.submit(7).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!pool.shutdown(Duration::from_millis(50)));
    // Second call is a no-op.
    assert!(pool.shutdown(Duration::from_millis(50)));
}

#[test]
fn test_submit_after_shutdown_hands_job_back() {
    let executor = Arc::new(CountingExecutor::default());
    let pool = WorkerPool::new(config(1, 2), Arc::clone(&executor)).unwrap();
    assert!(pool.shutdown(Duration::from_secs(1)));

    assert_eq!(pool.submit(42), Err(PoolError::PoolShutdown));
    assert_eq!(*executor.abandoned.lock(), vec![42]);
    assert_eq!(executor.execution_count(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    let executor = Arc::new(CountingExecutor::default());
    let result = WorkerPool::new(config(0, 2), executor);
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}
