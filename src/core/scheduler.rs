//! The task scheduler.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` guards the task index, the ready queue and the
//! execution metrics together. Every status transition happens under it, so
//! a task is either in the ready queue or claimed by exactly one worker,
//! never both. The lock is never held while a unit of work or a listener
//! runs.
//!
//! # Events
//!
//! Every transition appends its event to an outbox under the same lock, so
//! the outbox holds events in transition order. One thread at a time drains
//! it; a thread whose events are being delivered by another waits until they
//! are, so each call still returns only after its own events were delivered.
//! A hook that triggers further events from inside delivery is the exception:
//! those events follow once the hook returns. Each task's events therefore
//! reach listeners in the order they happened.
//!
//! # Threads
//!
//! - the clock loop wakes every `tick_interval`, pulls due tasks out of the
//!   ready queue in dispatch order, marks them running, fires `started` and
//!   hands them to the worker pool
//! - workers run the unit of work and record the outcome, re-queueing the
//!   task for a retry or its next recurrence
//! - callers enqueue, cancel and query from any thread

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::builders::SchedulerBuilder;
use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::executor::JobExecutor;
use crate::core::listener::{panic_message, EventNotifier, ListenerId, TaskEvent, TaskListener};
use crate::core::recurrence::{RecurrencePolicy, TimeUnit};
use crate::core::stats::{ExecutionMetrics, SchedulerStatistics};
use crate::core::task::{Task, TaskAction, TaskId, TaskSnapshot, TaskStatus};
use crate::core::worker_pool::{PoolError, PoolStats, WorkerPool};
use crate::infra::queue::ReadyQueue;
use crate::util::clock::{add_std, Clock};
use crate::util::serde::Priority;

/// A claimed task on its way to a worker.
pub(crate) struct DispatchJob {
    id: TaskId,
    action: TaskAction,
}

impl std::fmt::Debug for DispatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchJob").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Everything guarded by the scheduler lock.
#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    queue: ReadyQueue,
    metrics: ExecutionMetrics,
    /// Claimed tasks whose attempt has not been recorded yet.
    in_flight: usize,
    /// Events in transition order, waiting for delivery.
    outbox: VecDeque<Event>,
    published: u64,
    delivered: u64,
    /// Thread currently draining the outbox.
    deliverer: Option<ThreadId>,
    /// Acceptance order of tasks; breaks `created_at` ties.
    next_sequence: u64,
}

impl SchedulerState {
    fn publish(&mut self, events: impl IntoIterator<Item = Event>) {
        let before = self.outbox.len();
        self.outbox.extend(events);
        self.published += (self.outbox.len() - before) as u64;
    }

    const fn is_settled(&self) -> bool {
        self.in_flight == 0 && self.delivered == self.published
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Uptime {
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

type Event = (TaskEvent, TaskSnapshot);

/// State shared by callers, the clock loop and the workers.
pub(crate) struct SchedulerCore {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    /// Signalled whenever `in_flight` drops, events are delivered or the
    /// deliverer steps down.
    settled: Condvar,
    notifier: EventNotifier,
    accepting: AtomicBool,
    dispatching: AtomicBool,
    uptime: RwLock<Uptime>,
}

impl SchedulerCore {
    fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(SchedulerState::default()),
            settled: Condvar::new(),
            notifier: EventNotifier::new(),
            accepting: AtomicBool::new(true),
            dispatching: AtomicBool::new(false),
            uptime: RwLock::new(Uptime::default()),
        }
    }

    fn enqueue(&self, mut task: Task, due: DateTime<Utc>) -> Result<TaskId, SchedulerError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SchedulerError::ShutDown);
        }
        task.validate().map_err(SchedulerError::InvalidArgument)?;

        let id = task.id();
        let now = self.clock.now();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.tasks.contains_key(&id) {
                return Err(SchedulerError::DuplicateTask(id));
            }
            task.accept(now, state.next_sequence);
            state.next_sequence += 1;
            task.mark_scheduled(due);
            state.queue.insert(id, task.priority(), Some(due));
            debug!(
                task_id = %id,
                name = %task.name(),
                priority = %task.priority(),
                due = %due,
                "Task scheduled"
            );
            state.publish([(TaskEvent::Scheduled, task.snapshot())]);
            state.tasks.insert(id, task);
        }
        self.deliver_events();
        Ok(id)
    }

    /// Deliver every event published so far, or wait for the thread that
    /// is delivering them.
    fn deliver_events(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let target = state.published;
        loop {
            if state.delivered >= target {
                return;
            }
            let deliverer = state.deliverer;
            match deliverer {
                // Called from a hook; the enclosing delivery picks these up.
                Some(owner) if owner == me => return,
                Some(_) => self.settled.wait(&mut state),
                None => {
                    state.deliverer = Some(me);
                    loop {
                        let batch: Vec<Event> = state.outbox.drain(..).collect();
                        if batch.is_empty() {
                            break;
                        }
                        MutexGuard::unlocked(&mut state, || {
                            for (event, snapshot) in &batch {
                                self.notifier.notify(event, snapshot);
                            }
                        });
                        state.delivered += batch.len() as u64;
                        self.settled.notify_all();
                    }
                    state.deliverer = None;
                    self.settled.notify_all();
                    return;
                }
            }
        }
    }

    /// Pull every due task out of the ready queue and hand it to `pool`.
    fn dispatch_due(&self, pool: &WorkerPool<DispatchJob, Self>) -> usize {
        if !self.dispatching.load(Ordering::Acquire) {
            return 0;
        }
        let now = self.clock.now();

        let claimed: Vec<(DispatchJob, Priority)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let due = state.queue.extract_due(now);
            let mut claimed = Vec::with_capacity(due.len());
            let mut started = Vec::with_capacity(due.len());
            for id in due {
                let Some(task) = state.tasks.get_mut(&id) else {
                    warn!(task_id = %id, "Queued task missing from index");
                    continue;
                };
                if task.status() != TaskStatus::Scheduled {
                    warn!(task_id = %id, status = %task.status(), "Skipping queued task that is not scheduled");
                    continue;
                }
                let Some(action) = task.claim() else {
                    warn!(task_id = %id, "Queued task has no unit of work");
                    continue;
                };
                started.push((TaskEvent::Started, task.snapshot()));
                claimed.push((DispatchJob { id, action }, task.priority()));
            }
            state.in_flight += claimed.len();
            state.publish(started);
            claimed
        };
        self.deliver_events();

        let dispatched = claimed.len();
        for (job, priority) in claimed {
            let id = job.id;
            debug!(task_id = %id, priority = %priority, "Dispatching task");
            if let Err(e) = pool.submit(job) {
                warn!(task_id = %id, error = %e, "Worker pool rejected task");
            }
        }
        dispatched
    }

    /// Record a finished attempt and decide what happens next.
    fn finish(
        &self,
        id: TaskId,
        action: TaskAction,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: Result<(), String>,
    ) {
        let now = self.clock.now();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut events: Vec<Event> = Vec::with_capacity(2);
            state.in_flight = state.in_flight.saturating_sub(1);
            state.metrics.record(elapsed, outcome.is_ok());

            if let Some(task) = state.tasks.get_mut(&id) {
                task.restore_action(action);
                task.record_attempt(started_at, elapsed);
                let cancelled = task.status() == TaskStatus::Cancelled;

                match outcome {
                    Ok(()) => {
                        task.record_success();
                        debug!(task_id = %id, elapsed_ms = elapsed.as_millis(), "Task completed");
                        events.push((TaskEvent::Completed, task.snapshot()));
                        if !cancelled && task.recurrence().is_some() {
                            events.push(reschedule_recurring(&mut state.queue, task, now));
                        }
                    }
                    Err(error) => {
                        warn!(task_id = %id, error = %error, elapsed_ms = elapsed.as_millis(), "Task failed");
                        task.record_failure(error.clone());
                        events.push((TaskEvent::Failed(error), task.snapshot()));
                        if !cancelled {
                            // A failed run still counts toward the execution bound.
                            let executions = task.execution_count();
                            if task.recurrence().is_some_and(|policy| policy.is_exhausted(executions)) {
                                events.push(end_recurrence(task));
                            } else {
                                events.extend(self.schedule_retry(&mut state.queue, task, now));
                            }
                        }
                    }
                }
            }
            state.publish(events);
        }
        self.settled.notify_all();
        self.deliver_events();
    }

    fn schedule_retry(&self, queue: &mut ReadyQueue, task: &mut Task, now: DateTime<Utc>) -> Option<Event> {
        if task.retry_count() >= task.max_retries() {
            warn!(
                task_id = %task.id(),
                attempts = task.execution_count(),
                "Retries exhausted, task stays failed"
            );
            return None;
        }
        task.increment_retry();
        let due = add_std(now, self.config.retry_delay());
        task.mark_scheduled(due);
        queue.insert(task.id(), task.priority(), Some(due));
        info!(
            task_id = %task.id(),
            retry = task.retry_count(),
            max_retries = task.max_retries(),
            due = %due,
            "Retry scheduled"
        );
        Some((TaskEvent::Scheduled, task.snapshot()))
    }

    fn cancel(&self, id: TaskId) -> bool {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(&id) else {
                return false;
            };
            match task.status() {
                TaskStatus::Pending | TaskStatus::Scheduled => {
                    state.queue.remove(id);
                    task.mark_cancelled();
                }
                // The attempt in flight runs to completion; only bookkeeping changes.
                TaskStatus::Running => task.mark_cancelled(),
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => return false,
            }
            let cancelled = (TaskEvent::Cancelled, task.snapshot());
            state.publish([cancelled]);
        }
        info!(task_id = %id, "Task cancelled");
        self.deliver_events();
        true
    }

    fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_settled() {
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.is_settled();
            }
        }
        true
    }

    fn uptime(&self) -> Duration {
        let uptime = *self.uptime.read();
        let Some(started_at) = uptime.started_at else {
            return Duration::ZERO;
        };
        let until = uptime.stopped_at.unwrap_or_else(|| self.clock.now());
        (until - started_at).to_std().unwrap_or_default()
    }
}

/// Put a recurring task back in the queue, or cancel it if the policy is done.
fn reschedule_recurring(queue: &mut ReadyQueue, task: &mut Task, now: DateTime<Utc>) -> Event {
    let executions = task.execution_count();
    let next = task
        .recurrence()
        .and_then(|policy| policy.next_execution(now, executions));
    if let Some(due) = next {
        task.mark_scheduled(due);
        queue.insert(task.id(), task.priority(), Some(due));
        debug!(task_id = %task.id(), due = %due, "Next recurrence scheduled");
        (TaskEvent::Scheduled, task.snapshot())
    } else {
        end_recurrence(task)
    }
}

/// Cancel a recurring task whose policy allows no further runs.
fn end_recurrence(task: &mut Task) -> Event {
    task.mark_cancelled();
    info!(task_id = %task.id(), executions = task.execution_count(), "Recurrence exhausted");
    (TaskEvent::Cancelled, task.snapshot())
}

impl JobExecutor<DispatchJob> for SchedulerCore {
    fn execute(&self, job: DispatchJob) {
        let DispatchJob { id, mut action } = job;
        let started_at = self.clock.now();
        let started = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| action())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        self.finish(id, action, started_at, started.elapsed(), outcome);
    }

    fn abandon(&self, job: DispatchJob) {
        let DispatchJob { id, action } = job;
        let now = self.clock.now();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.in_flight = state.in_flight.saturating_sub(1);
            if let Some(task) = state.tasks.get_mut(&id) {
                task.restore_action(action);
                if task.status() == TaskStatus::Running {
                    let due = task.next_execution().unwrap_or(now);
                    task.mark_scheduled(due);
                    state.queue.insert(id, task.priority(), Some(due));
                }
            }
        }
        self.settled.notify_all();
        debug!(task_id = %id, "Dispatch abandoned, task returned to ready queue");
    }
}

/// Periodic driver thread.
struct ClockLoop {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl ClockLoop {
    fn spawn(
        core: Arc<SchedulerCore>,
        pool: Arc<WorkerPool<DispatchJob, SchedulerCore>>,
    ) -> Result<Self, PoolError> {
        let interval = core.config.tick_interval();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("task-scheduler-clock".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis(), "Clock loop started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            core.dispatch_due(&pool);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Clock loop stopped");
            })
            .map_err(|e| PoolError::Spawn(e.to_string()))?;
        Ok(Self { stop_tx, handle })
    }

    fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            warn!("Clock loop thread panicked");
        }
    }
}

struct Runtime {
    pool: Arc<WorkerPool<DispatchJob, SchedulerCore>>,
    clock_loop: Option<ClockLoop>,
}

enum Lifecycle {
    Created,
    Running(Runtime),
    Stopped,
}

/// Priority-aware in-memory task scheduler.
///
/// ```rust,ignore
/// use prometheus_task_scheduler::core::{Task, TaskScheduler};
/// use prometheus_task_scheduler::config::SchedulerConfig;
///
/// let scheduler = TaskScheduler::new(SchedulerConfig::default())?;
/// scheduler.start()?;
/// let id = scheduler.schedule_now(Task::new("report", || build_report()))?;
/// // ...
/// scheduler.stop();
/// ```
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler").finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Scheduler using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `config` fails validation.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        SchedulerBuilder::new().config(config).build()
    }

    /// Start building a scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        listeners: Vec<TaskListener>,
    ) -> Self {
        let core = SchedulerCore::new(config, clock);
        for listener in listeners {
            core.notifier.add(listener);
        }
        Self {
            core: Arc::new(core),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Queue `task` to run on the next tick.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed task and
    /// `SchedulerError::ShutDown` after `stop()`.
    pub fn schedule_now(&self, task: Task) -> Result<TaskId, SchedulerError> {
        let now = self.core.clock.now();
        self.core.enqueue(task, now)
    }

    /// Queue `task` to run at `at`. Times in the past are due immediately.
    ///
    /// # Errors
    ///
    /// Same as [`schedule_now`](Self::schedule_now).
    pub fn schedule_at(&self, task: Task, at: DateTime<Utc>) -> Result<TaskId, SchedulerError> {
        self.core.enqueue(task, at)
    }

    /// Queue `task` to run `amount` `unit`s from now.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidArgument` when the delay overflows,
    /// otherwise the same as [`schedule_now`](Self::schedule_now).
    pub fn schedule_after(&self, task: Task, amount: u64, unit: TimeUnit) -> Result<TaskId, SchedulerError> {
        let delay = unit
            .duration(amount)
            .ok_or_else(|| SchedulerError::InvalidArgument(format!("delay of {amount} {unit:?} overflows")))?;
        let due = add_std(self.core.clock.now(), delay);
        self.core.enqueue(task, due)
    }

    /// Queue a task carrying a recurrence policy.
    ///
    /// The first run is due at the time given by [`Task::starting_at`], or
    /// immediately if none was set.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidArgument` if the task has no policy or
    /// its first run would fall after the policy's end time, otherwise the
    /// same as [`schedule_now`](Self::schedule_now).
    pub fn schedule_recurring(&self, task: Task) -> Result<TaskId, SchedulerError> {
        let Some(end_time) = task.recurrence().map(RecurrencePolicy::end_time) else {
            return Err(SchedulerError::InvalidArgument(format!(
                "task {} has no recurrence policy",
                task.id()
            )));
        };
        let due = task.next_execution().unwrap_or_else(|| self.core.clock.now());
        if let Some(end) = end_time.filter(|end| due > *end) {
            return Err(SchedulerError::InvalidArgument(format!(
                "first run of task {} at {due} is after the recurrence end {end}",
                task.id()
            )));
        }
        self.core.enqueue(task, due)
    }

    /// Cancel a task. A scheduled task leaves the ready queue; a running
    /// task finishes its current attempt but is never re-queued.
    ///
    /// Returns `false` for unknown ids and tasks already terminal.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.core.cancel(id)
    }

    /// Start the worker pool and, if `auto_tick` is set, the clock loop.
    ///
    /// Calling `start` on a running scheduler is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ShutDown` after `stop()`, or a pool error if
    /// threads cannot be spawned.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running(_) => {
                warn!("Task scheduler already running");
                return Ok(());
            }
            Lifecycle::Stopped => return Err(SchedulerError::ShutDown),
            Lifecycle::Created => {}
        }

        let config = &self.core.config;
        let pool = Arc::new(WorkerPool::new(config.worker_pool(), Arc::clone(&self.core))?);
        self.core.uptime.write().started_at = Some(self.core.clock.now());
        self.core.dispatching.store(true, Ordering::Release);

        let clock_loop = if config.auto_tick {
            match ClockLoop::spawn(Arc::clone(&self.core), Arc::clone(&pool)) {
                Ok(clock_loop) => Some(clock_loop),
                Err(e) => {
                    self.core.dispatching.store(false, Ordering::Release);
                    pool.shutdown(config.shutdown_grace());
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        info!(
            tick_interval_ms = config.tick_interval_ms,
            core_pool_size = config.core_pool_size,
            max_pool_size = config.max_pool_size,
            auto_tick = config.auto_tick,
            "Task scheduler started"
        );
        *lifecycle = Lifecycle::Running(Runtime { pool, clock_loop });
        Ok(())
    }

    /// Stop ticking, stop accepting tasks and shut the worker pool down.
    ///
    /// Waits up to `shutdown_grace` for in-flight attempts. Tasks handed to
    /// the pool but not yet started return to the ready queue. Returns
    /// `false` if some workers had to be detached. Stopping is final.
    pub fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        self.core.accepting.store(false, Ordering::Release);
        self.core.dispatching.store(false, Ordering::Release);

        let Lifecycle::Running(runtime) = previous else {
            return true;
        };

        info!("Stopping task scheduler");
        self.core.uptime.write().stopped_at = Some(self.core.clock.now());
        if let Some(clock_loop) = runtime.clock_loop {
            clock_loop.stop();
        }
        let graceful = runtime.pool.shutdown(self.core.config.shutdown_grace());
        info!(graceful = graceful, "Task scheduler stopped");
        graceful
    }

    /// Whether the scheduler has been started and not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Run one clock cycle now. Returns the number of tasks dispatched.
    ///
    /// The clock loop calls this every tick; with `auto_tick` off, callers
    /// drive the scheduler through it.
    pub fn tick(&self) -> usize {
        let pool = match &*self.lifecycle.lock() {
            Lifecycle::Running(runtime) => Arc::clone(&runtime.pool),
            Lifecycle::Created | Lifecycle::Stopped => return 0,
        };
        self.core.dispatch_due(&pool)
    }

    /// Block until no attempt is in flight and every event has been
    /// delivered, or `timeout` passes. Returns whether the scheduler settled.
    /// Calling this from a listener hook always runs into the timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.core.wait_until_settled(timeout)
    }

    /// Snapshot of one task.
    #[must_use]
    pub fn get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.core.state.lock().tasks.get(&id).map(Task::snapshot)
    }

    /// Snapshots of every known task, oldest first.
    #[must_use]
    pub fn list_all_tasks(&self) -> Vec<TaskSnapshot> {
        self.collect_tasks(|_| true)
    }

    /// Snapshots of tasks in `status`, oldest first.
    #[must_use]
    pub fn list_tasks_by_status(&self, status: TaskStatus) -> Vec<TaskSnapshot> {
        self.collect_tasks(|task| task.status() == status)
    }

    /// Snapshots of tasks waiting in the ready queue, in dispatch order.
    #[must_use]
    pub fn list_pending(&self) -> Vec<TaskSnapshot> {
        let state = self.core.state.lock();
        state
            .queue
            .iter()
            .filter_map(|id| state.tasks.get(&id).map(Task::snapshot))
            .collect()
    }

    /// Earliest due time in the ready queue. Callers driving [`tick`](Self::tick)
    /// by hand can sleep until then.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.core.state.lock().queue.next_due()
    }

    /// Snapshots of tasks currently running.
    #[must_use]
    pub fn list_running(&self) -> Vec<TaskSnapshot> {
        self.list_tasks_by_status(TaskStatus::Running)
    }

    fn collect_tasks(&self, keep: impl Fn(&Task) -> bool) -> Vec<TaskSnapshot> {
        let state = self.core.state.lock();
        let mut tasks: Vec<&Task> = state.tasks.values().filter(|&task| keep(task)).collect();
        tasks.sort_by_key(|task| (task.created_at(), task.sequence()));
        tasks.into_iter().map(Task::snapshot).collect()
    }

    /// Current statistics.
    #[must_use]
    pub fn statistics(&self) -> SchedulerStatistics {
        let pool = self.pool_stats();
        let mut stats = {
            let state = self.core.state.lock();
            SchedulerStatistics::collect(state.tasks.values(), &state.metrics)
        };
        if let Some(pool) = pool {
            stats.active_workers = pool.active_jobs;
            stats.worker_threads = pool.worker_count;
        }
        stats.uptime = self.core.uptime();
        stats
    }

    /// Worker pool statistics while running.
    #[must_use]
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(runtime) => Some(runtime.pool.stats()),
            Lifecycle::Created | Lifecycle::Stopped => None,
        }
    }

    /// Register a listener; it is called after all earlier ones.
    pub fn add_listener(&self, listener: TaskListener) -> ListenerId {
        self.core.notifier.add(listener)
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.notifier.remove(id)
    }

    /// Enable or disable a task's recurrence. Returns `false` if the task is
    /// unknown or not recurring.
    pub fn set_recurrence_enabled(&self, id: TaskId, enabled: bool) -> bool {
        let mut state = self.core.state.lock();
        let Some(policy) = state.tasks.get_mut(&id).and_then(Task::recurrence_mut) else {
            return false;
        };
        policy.set_enabled(enabled);
        debug!(task_id = %id, enabled = enabled, "Recurrence toggled");
        true
    }

    /// Drop a terminal task from the index and return its final snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::TaskNotFound` for unknown ids and
    /// `SchedulerError::InvalidArgument` for tasks that are not terminal.
    pub fn evict(&self, id: TaskId) -> Result<TaskSnapshot, SchedulerError> {
        let mut state = self.core.state.lock();
        let status = state
            .tasks
            .get(&id)
            .map(Task::status)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        if !status.is_terminal() {
            return Err(SchedulerError::InvalidArgument(format!(
                "task {id} is {status} and cannot be evicted"
            )));
        }
        state
            .tasks
            .remove(&id)
            .map(|task| task.snapshot())
            .ok_or(SchedulerError::TaskNotFound(id))
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        // Signal shutdown but don't wait for workers in Drop
        self.core.accepting.store(false, Ordering::Release);
        self.core.dispatching.store(false, Ordering::Release);
        if let Lifecycle::Running(runtime) = std::mem::replace(self.lifecycle.get_mut(), Lifecycle::Stopped) {
            if let Some(clock_loop) = runtime.clock_loop {
                drop(clock_loop.stop_tx);
            }
            debug!("TaskScheduler dropped without explicit stop - threads will be detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;
    use std::sync::atomic::AtomicU32;

    fn manual_scheduler() -> (TaskScheduler, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let config = SchedulerConfig::new()
            .with_auto_tick(false)
            .with_pool_size(2, 4)
            .with_retry_delay(Duration::from_secs(30))
            .with_shutdown_grace(Duration::from_secs(5));
        let scheduler = TaskScheduler::builder()
            .config(config)
            .clock(clock.clone())
            .build()
            .unwrap();
        scheduler.start().unwrap();
        (scheduler, clock)
    }

    fn run_tick(scheduler: &TaskScheduler) -> usize {
        let dispatched = scheduler.tick();
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        dispatched
    }

    #[test]
    fn completes_task_due_now() {
        let (scheduler, _clock) = manual_scheduler();
        let counter = Arc::new(AtomicU32::new(0));
        let hits = Arc::clone(&counter);
        let id = scheduler
            .schedule_now(Task::new("increment", move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        assert_eq!(run_tick(&scheduler), 1);
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.execution_count, 1);
        assert!(task.last_duration.is_some());
        scheduler.stop();
    }

    #[test]
    fn future_task_waits_for_clock() {
        let (scheduler, clock) = manual_scheduler();
        let id = scheduler
            .schedule_after(Task::new("later", || Ok(())), 10, TimeUnit::Seconds)
            .unwrap();
        assert_eq!(run_tick(&scheduler), 0);
        assert_eq!(scheduler.get_task(id).unwrap().status, TaskStatus::Scheduled);

        clock.advance(Duration::from_secs(10));
        assert_eq!(run_tick(&scheduler), 1);
        assert_eq!(scheduler.get_task(id).unwrap().status, TaskStatus::Completed);
        scheduler.stop();
    }

    #[test]
    fn failure_retries_after_delay_then_gives_up() {
        let (scheduler, clock) = manual_scheduler();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let id = scheduler
            .schedule_now(
                Task::new("always-fails", move || {
                    seen.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("backend unavailable")
                })
                .with_max_retries(2),
            )
            .unwrap();

        run_tick(&scheduler);
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("backend unavailable"));

        // Not yet due.
        clock.advance(Duration::from_secs(29));
        assert_eq!(run_tick(&scheduler), 0);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(30));
            run_tick(&scheduler);
        }
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.execution_count, 3);
        assert_eq!(scheduler.statistics().failed_executions, 3);
        scheduler.stop();
    }

    #[test]
    fn panicking_action_counts_as_failure() {
        let (scheduler, _clock) = manual_scheduler();
        let id = scheduler
            .schedule_now(Task::new("panics", || panic!("bad input")).with_max_retries(0))
            .unwrap();
        run_tick(&scheduler);
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("panicked: bad input"));
        scheduler.stop();
    }

    #[test]
    fn recurring_task_stops_after_max_executions() {
        let (scheduler, clock) = manual_scheduler();
        let id = scheduler
            .schedule_recurring(
                Task::new("heartbeat", || Ok(()))
                    .with_recurrence(RecurrencePolicy::every(1, TimeUnit::Minutes).with_max_executions(3)),
            )
            .unwrap();

        for _ in 0..6 {
            run_tick(&scheduler);
            clock.advance(Duration::from_secs(60));
        }
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.execution_count, 3);
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.next_execution.is_none());
        scheduler.stop();
    }

    #[test]
    fn disabling_recurrence_cancels_after_current_run() {
        let (scheduler, clock) = manual_scheduler();
        let id = scheduler
            .schedule_recurring(Task::new("poll", || Ok(())).with_recurrence(RecurrencePolicy::hourly()))
            .unwrap();
        run_tick(&scheduler);
        assert_eq!(scheduler.get_task(id).unwrap().status, TaskStatus::Scheduled);

        assert!(scheduler.set_recurrence_enabled(id, false));
        clock.advance(Duration::from_secs(3600));
        run_tick(&scheduler);
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.execution_count, 2);
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn schedule_recurring_requires_policy() {
        let (scheduler, _clock) = manual_scheduler();
        let err = scheduler.schedule_recurring(Task::new("plain", || Ok(()))).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn cancel_scheduled_removes_from_queue() {
        let (scheduler, clock) = manual_scheduler();
        let id = scheduler
            .schedule_after(Task::new("doomed", || Ok(())), 5, TimeUnit::Seconds)
            .unwrap();
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert!(scheduler.list_pending().is_empty());

        clock.advance(Duration::from_secs(60));
        assert_eq!(run_tick(&scheduler), 0);
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.execution_count, 0);
    }

    #[test]
    fn next_due_tracks_earliest_queued_task() {
        let (scheduler, clock) = manual_scheduler();
        assert!(scheduler.next_due().is_none());
        let later = scheduler
            .schedule_after(Task::new("later", || Ok(())), 60, TimeUnit::Seconds)
            .unwrap();
        let sooner = scheduler
            .schedule_after(Task::new("sooner", || Ok(())), 5, TimeUnit::Seconds)
            .unwrap();
        assert_eq!(scheduler.next_due(), scheduler.get_task(sooner).unwrap().next_execution);

        assert!(scheduler.cancel(sooner));
        assert_eq!(scheduler.next_due(), scheduler.get_task(later).unwrap().next_execution);

        clock.advance(Duration::from_secs(60));
        assert_eq!(run_tick(&scheduler), 1);
        assert!(scheduler.next_due().is_none());
        scheduler.stop();
    }

    #[test]
    fn cancel_unknown_task_is_false() {
        let (scheduler, _clock) = manual_scheduler();
        assert!(!scheduler.cancel(TaskId::new()));
    }

    #[test]
    fn list_pending_is_in_dispatch_order() {
        let (scheduler, _clock) = manual_scheduler();
        let low = scheduler
            .schedule_now(Task::new("low", || Ok(())).with_priority(Priority::Low))
            .unwrap();
        let critical = scheduler
            .schedule_now(Task::new("critical", || Ok(())).with_priority(Priority::Critical))
            .unwrap();
        let order: Vec<TaskId> = scheduler.list_pending().into_iter().map(|t| t.id).collect();
        assert_eq!(order, vec![critical, low]);
    }

    #[test]
    fn evict_only_terminal_tasks() {
        let (scheduler, _clock) = manual_scheduler();
        let id = scheduler.schedule_now(Task::new("short", || Ok(()))).unwrap();
        assert!(matches!(scheduler.evict(id), Err(SchedulerError::InvalidArgument(_))));
        run_tick(&scheduler);
        let evicted = scheduler.evict(id).unwrap();
        assert_eq!(evicted.status, TaskStatus::Completed);
        assert!(scheduler.get_task(id).is_none());
        assert!(matches!(scheduler.evict(id), Err(SchedulerError::TaskNotFound(_))));
    }

    #[test]
    fn stop_is_final() {
        let (scheduler, _clock) = manual_scheduler();
        assert!(scheduler.is_running());
        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.start(), Err(SchedulerError::ShutDown)));
        assert!(matches!(
            scheduler.schedule_now(Task::new("late", || Ok(()))),
            Err(SchedulerError::ShutDown)
        ));
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn abandoned_dispatch_returns_to_queue_unexecuted() {
        let (scheduler, _clock) = manual_scheduler();
        let id = scheduler.schedule_now(Task::new("handed-back", || Ok(()))).unwrap();
        let due = scheduler.get_task(id).unwrap().next_execution;

        let action = {
            let mut state = scheduler.core.state.lock();
            let _ = state.queue.extract_due(scheduler.core.clock.now());
            let action = state.tasks.get_mut(&id).and_then(Task::claim).unwrap();
            state.in_flight += 1;
            action
        };
        assert_eq!(scheduler.get_task(id).unwrap().status, TaskStatus::Running);

        scheduler.core.abandon(DispatchJob { id, action });
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.next_execution, due);
        assert_eq!(task.execution_count, 0);
        assert!(scheduler.wait_until_idle(Duration::from_millis(100)));

        // The action came back with the task, so it can still run.
        assert_eq!(run_tick(&scheduler), 1);
        assert_eq!(scheduler.get_task(id).unwrap().status, TaskStatus::Completed);
        scheduler.stop();
    }

    #[test]
    fn listener_may_enqueue_from_its_hook() {
        let (scheduler, _clock) = manual_scheduler();
        let scheduler = Arc::new(scheduler);
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let weak = Arc::downgrade(&scheduler);
        scheduler.add_listener(TaskListener::from_fn(move |event, task| {
            seen.lock().push(format!("{}:{}", task.name, event.name()));
            if task.name == "parent" && matches!(event, TaskEvent::Scheduled) {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.schedule_now(Task::new("child", || Ok(()))).unwrap();
                }
            }
        }));

        scheduler.schedule_now(Task::new("parent", || Ok(()))).unwrap();
        assert_eq!(*log.lock(), vec!["parent:scheduled", "child:scheduled"]);
        assert_eq!(run_tick(&scheduler), 2);
        scheduler.stop();
    }

    #[test]
    fn tasks_accepted_at_same_instant_list_in_acceptance_order() {
        let (scheduler, _clock) = manual_scheduler();
        let ids: Vec<TaskId> = (0..20)
            .map(|n| scheduler.schedule_now(Task::new(format!("t{n}"), || Ok(()))).unwrap())
            .collect();
        let listed: Vec<TaskId> = scheduler.list_all_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(listed, ids);
        scheduler.stop();
    }

    #[test]
    fn uptime_follows_injected_clock() {
        let (scheduler, clock) = manual_scheduler();
        clock.advance(Duration::from_secs(90));
        assert_eq!(scheduler.statistics().uptime, Duration::from_secs(90));
        scheduler.stop();
        clock.advance(Duration::from_secs(90));
        assert_eq!(scheduler.statistics().uptime, Duration::from_secs(90));
    }
}
