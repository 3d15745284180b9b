//! Task structure and execution state

use crate::scheduler::state::State;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Boxed task body; the pinned future is the task's saved execution context
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Opaque identifier of a task
///
/// Handles are process-unique and never reused. A handle is a lookup key
/// into the registry, not a reference to the task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

static NEXT_TASK_HANDLE: AtomicU64 = AtomicU64::new(1);

impl TaskHandle {
    /// Allocate a fresh handle
    pub(crate) fn next() -> Self {
        TaskHandle(NEXT_TASK_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a handle from a numeric value
    pub fn from_u64(id: u64) -> Self {
        TaskHandle(id)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling status of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting in a run queue
    Runnable,
    /// Currently executing on a worker
    Running,
    /// Suspended in `block()` until resumed by handle
    Blocked,
    /// Finished; no longer schedulable
    Dead,
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Future ran to completion
    Completed,
    /// Future panicked; carries the panic message
    Panicked(String),
    /// Scheduler shut down while the task was still alive
    Aborted,
}

/// Point-in-time view of a task's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task handle
    pub handle: TaskHandle,
    /// Status at the time of the snapshot
    pub status: TaskStatus,
    /// A resume landed that `clear_status()` has not consumed yet
    pub woken: bool,
    /// Number of times the task entered `Blocked`
    pub blocks: u64,
    /// Number of resumes accepted for this task
    pub wakes: u64,
}

/// Task control block, owned by the registry
pub(crate) struct Task {
    /// Unique handle
    handle: TaskHandle,

    /// Status word
    state: State,

    /// Parked execution context (None once the future finished or was dropped)
    future: Mutex<Option<TaskFuture>>,

    /// Suspend counter
    blocks: AtomicU64,

    /// Accepted wake counter
    wakes: AtomicU64,

    /// Completion outcome, set exactly once
    outcome: Mutex<Option<TaskOutcome>>,

    /// Condvar for blocking until the task completes
    completion: Condvar,
}

impl Task {
    /// Create a new Task around its body
    pub(crate) fn new(future: TaskFuture) -> Self {
        Self {
            handle: TaskHandle::next(),
            state: State::new(),
            future: Mutex::new(Some(future)),
            blocks: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
            outcome: Mutex::new(None),
            completion: Condvar::new(),
        }
    }

    /// Get the Task's handle
    pub(crate) fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Get the status word
    pub(crate) fn state(&self) -> &State {
        &self.state
    }

    /// Get the current status
    pub(crate) fn status(&self) -> TaskStatus {
        self.state.status()
    }

    /// Get the parked future slot
    pub(crate) fn future(&self) -> &Mutex<Option<TaskFuture>> {
        &self.future
    }

    pub(crate) fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wake(&self) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Consume the wake marker; false if there was none
    pub(crate) fn take_woken(&self) -> bool {
        self.state.take_woken()
    }

    /// Snapshot the bookkeeping
    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo {
            handle: self.handle,
            status: self.status(),
            woken: self.state.is_woken(),
            blocks: self.blocks.load(Ordering::Relaxed),
            wakes: self.wakes.load(Ordering::Relaxed),
        }
    }

    /// Mark the task dead and signal joiners
    ///
    /// Returns false if the task had already finished.
    pub(crate) fn finish(&self, outcome: TaskOutcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        self.state.transition_to_dead();
        *slot = Some(outcome);
        self.completion.notify_all();
        true
    }

    /// Get the outcome (if finished)
    pub(crate) fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome.lock().clone()
    }

    /// Block the calling thread until the task finishes
    pub(crate) fn wait_completion(&self) -> TaskOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.completion.wait(&mut slot);
        }
    }

    /// Block until the task finishes, with a timeout
    pub(crate) fn wait_completion_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            self.completion.wait_while_for(&mut slot, |s| s.is_none(), timeout);
        }
        slot.clone()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Owned handle to a spawned task, used to wait for it
///
/// Keeps the control block alive after the registry drops it. Joining
/// blocks the OS thread, so it must not be done from inside a task.
#[derive(Debug, Clone)]
pub struct JoinHandle {
    task: std::sync::Arc<Task>,
}

impl JoinHandle {
    pub(crate) fn new(task: std::sync::Arc<Task>) -> Self {
        Self { task }
    }

    /// Handle of the spawned task
    pub fn handle(&self) -> TaskHandle {
        self.task.handle()
    }

    /// Current status of the task
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Whether the task has finished
    pub fn is_finished(&self) -> bool {
        self.task.outcome().is_some()
    }

    /// Wait for the task to finish
    pub fn join(&self) -> TaskOutcome {
        self.task.wait_completion()
    }

    /// Wait for the task to finish, giving up after `timeout`
    pub fn join_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.task.wait_completion_timeout(timeout)
    }
}
