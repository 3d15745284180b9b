//! Main task scheduler coordinating worker threads

use crate::config::SchedulerConfig;
use crate::error::{SchedError, SchedResult};
use crate::scheduler::deque::WorkerDeque;
use crate::scheduler::registry::Registry;
use crate::scheduler::state::Wake;
use crate::scheduler::worker::{panic_message, Worker};
use crate::scheduler::{context, JoinHandle, Task, TaskHandle, TaskInfo, TaskOutcome, TaskStatus};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Tasks whose future ran to completion
    pub tasks_completed: u64,

    /// Tasks that panicked
    pub tasks_panicked: u64,

    /// Tasks still alive at shutdown
    pub tasks_aborted: u64,

    /// Currently registered tasks
    pub active_tasks: usize,

    /// Currently blocked tasks
    pub blocked_tasks: usize,

    /// Resumes that made a blocked task runnable
    pub wakes: u64,

    /// Resumes rejected because the target was not blocked or not alive
    pub rejected_wakes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    aborted: AtomicU64,
    wakes: AtomicU64,
    rejected_wakes: AtomicU64,
}

/// State shared by the scheduler, its handles and its workers
pub(crate) struct Shared {
    config: SchedulerConfig,

    /// Task registry (handle → control block)
    registry: Registry,

    /// Global run queue
    injector: Arc<Injector<Arc<Task>>>,

    /// Idle workers wait here for new work
    idle_lock: Mutex<()>,
    idle: Condvar,

    /// Signalled whenever a task leaves the registry
    drained_lock: Mutex<()>,
    drained: Condvar,

    /// Workers must exit
    shutting_down: AtomicBool,

    /// No more spawns or starts
    closed: AtomicBool,

    counters: Counters,
}

impl Shared {
    pub(crate) fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            injector: Arc::new(Injector::new()),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Park an idle worker until work is pushed or the idle timeout passes
    pub(crate) fn wait_for_work(&self) {
        let mut guard = self.idle_lock.lock();
        if self.injector.is_empty() && !self.is_shutting_down() {
            self.idle.wait_for(&mut guard, self.config.idle_timeout);
        }
    }

    pub(crate) fn notify_work(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_one();
    }

    fn notify_all_workers(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }

    fn enqueue(&self, task: Arc<Task>) {
        self.injector.push(task);
        self.notify_work();
    }

    fn spawn(&self, future: crate::scheduler::task::TaskFuture) -> SchedResult<JoinHandle> {
        if self.is_closed() {
            return Err(SchedError::ShutDown);
        }
        if let Some(max) = self.config.max_tasks {
            if self.registry.len() >= max {
                return Err(SchedError::TaskLimit(max));
            }
        }

        let task = Arc::new(Task::new(future));
        self.registry.insert(task.clone());

        // Lost a race with shutdown: the registry may already have been drained
        if self.is_closed() {
            self.discard(&task);
            return Err(SchedError::ShutDown);
        }

        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(task = %task.handle(), "spawned");
        self.enqueue(task.clone());
        Ok(JoinHandle::new(task))
    }

    /// `Blocked → Runnable` for the task behind `handle`, then enqueue it
    pub(crate) fn resume(&self, handle: TaskHandle) -> SchedResult<()> {
        let result = match self.registry.get(handle) {
            None => Err(SchedError::InvalidHandle(handle)),
            Some(task) => match task.state().transition_to_runnable() {
                Ok(wake) => {
                    task.record_wake();
                    self.counters.wakes.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(task = %handle, ?wake, "resumed");
                    if wake == Wake::Enqueue {
                        self.enqueue(task);
                    }
                    Ok(())
                }
                Err(TaskStatus::Dead) => Err(SchedError::InvalidHandle(handle)),
                Err(status) => Err(SchedError::NotBlocked { handle, status }),
            },
        };

        if let Err(e) = &result {
            self.counters.rejected_wakes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(task = %handle, error = %e, "resume rejected");
        }
        result
    }

    /// Record a task's death and drop it from the registry
    pub(crate) fn complete(&self, task: &Arc<Task>, outcome: TaskOutcome) {
        let counter = match &outcome {
            TaskOutcome::Completed => &self.counters.completed,
            TaskOutcome::Panicked(_) => &self.counters.panicked,
            TaskOutcome::Aborted => &self.counters.aborted,
        };
        if !task.finish(outcome) {
            return;
        }
        counter.fetch_add(1, Ordering::Relaxed);
        self.registry.remove(task.handle());
        tracing::trace!(task = %task.handle(), "finished");
        self.notify_drained();
    }

    /// Drop a task that was registered but never counted as spawned
    fn discard(&self, task: &Arc<Task>) {
        self.registry.remove(task.handle());
        task.finish(TaskOutcome::Aborted);
        self.notify_drained();
    }

    fn notify_drained(&self) {
        let _guard = self.drained_lock.lock();
        self.drained.notify_all();
    }

    /// Abort every task still alive; only called once workers have exited
    fn abort_remaining(&self) {
        loop {
            match self.injector.steal() {
                Steal::Success(_) => {}
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        for task in self.registry.drain() {
            let future = task.future().lock().take();
            if future.is_some() {
                let _enter = context::enter(task.clone());
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(future))) {
                    tracing::error!(
                        task = %task.handle(),
                        message = %panic_message(payload.as_ref()),
                        "task destructor panicked during shutdown"
                    );
                }
            }
            tracing::warn!(task = %task.handle(), status = ?task.status(), "aborting task at shutdown");
            self.complete(&task, TaskOutcome::Aborted);
        }
    }

    fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.drained_lock.lock();
        while !self.registry.is_empty() {
            if self.drained.wait_until(&mut guard, deadline).timed_out() {
                return self.registry.is_empty();
            }
        }
        true
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_spawned: self.counters.spawned.load(Ordering::Relaxed),
            tasks_completed: self.counters.completed.load(Ordering::Relaxed),
            tasks_panicked: self.counters.panicked.load(Ordering::Relaxed),
            tasks_aborted: self.counters.aborted.load(Ordering::Relaxed),
            active_tasks: self.registry.len(),
            blocked_tasks: self.registry.count_status(TaskStatus::Blocked),
            wakes: self.counters.wakes.load(Ordering::Relaxed),
            rejected_wakes: self.counters.rejected_wakes.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable, thread-safe reference to a scheduler
///
/// This is what tasks capture to spawn other tasks or resume them by
/// handle. It does not keep worker threads alive; dropping the owning
/// [`Scheduler`] shuts them down.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Spawn a new task
    ///
    /// The task is registered as `Runnable` and pushed to the global run
    /// queue; it starts once a worker picks it up. Fails with `TaskLimit`
    /// when `max_tasks` live tasks exist and with `ShutDown` once the
    /// scheduler is shut down.
    pub fn spawn<F>(&self, future: F) -> SchedResult<JoinHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.spawn(Box::pin(future))
    }

    /// Resume a blocked task by handle
    ///
    /// Succeeds only if this call moved the task from `Blocked` to
    /// `Runnable`. Every other case is reported, never silently dropped:
    /// `InvalidHandle` when the task is dead or unknown, `NotBlocked` when
    /// it is runnable or running (including a second resume of the same
    /// wakeup). Wake-all loops may ignore these errors.
    pub fn resume(&self, handle: TaskHandle) -> SchedResult<()> {
        self.shared.resume(handle)
    }

    /// Status of a live task
    pub fn status(&self, handle: TaskHandle) -> Option<TaskStatus> {
        self.shared.registry.get(handle).map(|task| task.status())
    }

    /// Bookkeeping snapshot of a live task
    pub fn task_info(&self, handle: TaskHandle) -> Option<TaskInfo> {
        self.shared.registry.get(handle).map(|task| task.info())
    }

    /// Number of live tasks
    pub fn task_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    /// Wait until every task has finished; false on timeout
    pub fn wait_all(&self, timeout: Duration) -> bool {
        self.shared.wait_all(timeout)
    }

    /// Whether the scheduler has been shut down
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("tasks", &self.shared.registry.len())
            .field("shut_down", &self.shared.is_closed())
            .finish()
    }
}

/// Main task scheduler
///
/// Owns the worker threads. Tasks may be spawned before [`start`](Self::start);
/// they run once the workers are up.
pub struct Scheduler {
    handle: SchedulerHandle,

    /// Worker threads
    workers: Vec<Worker>,

    /// Number of worker threads
    worker_count: usize,

    /// Whether the scheduler has been started
    started: bool,
}

impl Scheduler {
    /// Create a scheduler from a configuration
    pub fn new(config: SchedulerConfig) -> Self {
        let worker_count = config.effective_workers();
        Self {
            handle: SchedulerHandle {
                shared: Arc::new(Shared::new(config)),
            },
            workers: Vec::new(),
            worker_count,
            started: false,
        }
    }

    /// Create a scheduler with the specified number of workers
    /// If worker_count is 0, defaults to the number of CPU cores
    pub fn with_workers(worker_count: usize) -> Self {
        Self::new(SchedulerConfig::default().with_workers(worker_count))
    }

    /// Start all worker threads
    ///
    /// Idempotent. If a worker thread cannot be spawned the scheduler is
    /// shut down and the error returned.
    pub fn start(&mut self) -> SchedResult<()> {
        if self.started {
            return Ok(());
        }
        let shared = self.handle.shared.clone();
        if shared.is_closed() {
            return Err(SchedError::ShutDown);
        }

        let deques = WorkerDeque::build_set(self.worker_count, &shared.injector);
        for (id, deque) in deques.into_iter().enumerate() {
            match Worker::start(id, deque, shared.clone()) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => {
                    tracing::error!(worker = id, error = %e, "failed to start worker");
                    self.shutdown();
                    return Err(e);
                }
            }
        }

        self.started = true;
        tracing::debug!(workers = self.worker_count, "scheduler started");
        Ok(())
    }

    /// Cloneable handle for spawning and resuming from anywhere
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Spawn a new task (see [`SchedulerHandle::spawn`])
    pub fn spawn<F>(&self, future: F) -> SchedResult<JoinHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Resume a blocked task (see [`SchedulerHandle::resume`])
    pub fn resume(&self, handle: TaskHandle) -> SchedResult<()> {
        self.handle.resume(handle)
    }

    /// Status of a live task
    pub fn status(&self, handle: TaskHandle) -> Option<TaskStatus> {
        self.handle.status(handle)
    }

    /// Bookkeeping snapshot of a live task
    pub fn task_info(&self, handle: TaskHandle) -> Option<TaskInfo> {
        self.handle.task_info(handle)
    }

    /// Number of live tasks
    pub fn task_count(&self) -> usize {
        self.handle.task_count()
    }

    /// Scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }

    /// Wait until every task has finished; false on timeout
    pub fn wait_all(&self, timeout: Duration) -> bool {
        self.handle.wait_all(timeout)
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Check if the scheduler has been started
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Shutdown the scheduler
    ///
    /// Stops and joins all workers, then aborts every task still alive
    /// (blocked tasks included). Further spawns fail with `ShutDown`.
    pub fn shutdown(&mut self) {
        let shared = &self.handle.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        shared.shutting_down.store(true, Ordering::Release);
        shared.notify_all_workers();
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
        self.started = false;

        shared.abort_remaining();
        tracing::debug!("scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
