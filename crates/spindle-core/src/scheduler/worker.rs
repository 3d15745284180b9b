//! Worker thread that executes Tasks
//!
//! Workers pick up tasks from their local deque, by stealing from other
//! workers, or from the global injector, then poll them once. After a
//! `Pending` poll the worker drops ownership through the state word and
//! either leaves the task parked or puts it back into its local deque.

use crate::error::{SchedError, SchedResult};
use crate::scheduler::context;
use crate::scheduler::deque::WorkerDeque;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::state::Release;
use crate::scheduler::{Task, TaskOutcome};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

/// Worker thread that executes Tasks
pub(crate) struct Worker {
    /// Worker ID
    id: usize,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread
    pub(crate) fn start(id: usize, deque: WorkerDeque, shared: Arc<Shared>) -> SchedResult<Self> {
        let name = format!("{}-{}", shared.config().thread_name_prefix, id);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Worker::run_loop(id, deque, shared))
            .map_err(|e| SchedError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Wait for the worker thread to exit (the shutdown flag must be set)
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(worker = self.id, "worker thread panicked");
            }
        }
    }

    /// Worker thread main loop
    fn run_loop(id: usize, deque: WorkerDeque, shared: Arc<Shared>) {
        tracing::debug!(worker = id, "worker started");

        while !shared.is_shutting_down() {
            match deque.find_work() {
                Some(task) => Self::run_task(id, &deque, &shared, task),
                None => shared.wait_for_work(),
            }
        }

        tracing::debug!(worker = id, "worker shutting down");
    }

    /// Dispatch one task and poll it once
    fn run_task(id: usize, deque: &WorkerDeque, shared: &Shared, task: Arc<Task>) {
        if let Err(status) = task.state().transition_to_running() {
            tracing::trace!(worker = id, task = %task.handle(), ?status, "skipping non-runnable task");
            return;
        }
        tracing::trace!(worker = id, task = %task.handle(), "dispatched");

        let result = Self::poll_task(&task);

        match result {
            Ok(Poll::Pending) => match task.state().release() {
                Release::Parked => {
                    tracing::trace!(worker = id, task = %task.handle(), "parked");
                }
                Release::Reschedule => {
                    deque.push(task);
                    shared.notify_work();
                }
            },
            Ok(Poll::Ready(())) => {
                shared.complete(&task, TaskOutcome::Completed);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(worker = id, task = %task.handle(), %message, "task panicked");
                shared.complete(&task, TaskOutcome::Panicked(message));
            }
        }
    }

    /// Poll the task's future with the task installed as current
    ///
    /// The future is dropped here, still inside the task context, once it
    /// finishes or panics.
    fn poll_task(task: &Arc<Task>) -> std::thread::Result<Poll<()>> {
        let _enter = context::enter(task.clone());
        let mut slot = task.future().lock();

        let Some(future) = slot.as_mut() else {
            return Ok(Poll::Ready(()));
        };

        // Tasks are rescheduled by resume or yield, never through the waker
        let mut cx = Context::from_waker(Waker::noop());
        let result = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        if !matches!(result, Ok(Poll::Pending)) {
            let finished = slot.take();
            if panic::catch_unwind(AssertUnwindSafe(move || drop(finished))).is_err() {
                tracing::error!(task = %task.handle(), "task destructor panicked");
            }
        }

        result
    }
}

/// Extract the message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
