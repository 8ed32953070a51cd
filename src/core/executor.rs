//! Job execution seam between the worker pool and its owner.

/// Runs jobs handed out by a [`WorkerPool`](crate::core::worker_pool::WorkerPool).
///
/// The pool calls [`execute`](JobExecutor::execute) on a worker thread for
/// every job it accepts. Jobs that are still queued when the pool shuts down
/// are handed to [`abandon`](JobExecutor::abandon) instead, so no job is ever
/// silently dropped.
pub trait JobExecutor<J>: Send + Sync + 'static
where
    J: Send + 'static,
{
    /// Run `job` to completion on the calling worker thread.
    fn execute(&self, job: J);

    /// Take back a job that will never run.
    fn abandon(&self, job: J);
}
