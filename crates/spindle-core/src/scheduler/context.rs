//! Per-worker task context
//!
//! While a worker polls a task it installs that task in a thread-local slot.
//! Everything a task can do to itself (identify, block, yield, clear its
//! wake marker) goes through this slot, so none of it needs a reference to
//! the scheduler.

use crate::error::{SchedError, SchedResult};
use crate::scheduler::{Task, TaskHandle};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

thread_local! {
    static CURRENT: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// Restores the previous slot contents on drop
pub(crate) struct Enter {
    prev: Option<Arc<Task>>,
}

/// Install `task` as the current task for the lifetime of the guard
pub(crate) fn enter(task: Arc<Task>) -> Enter {
    let prev = CURRENT.with(|slot| slot.replace(Some(task)));
    Enter { prev }
}

impl Drop for Enter {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let _ = CURRENT.try_with(|slot| *slot.borrow_mut() = prev);
    }
}

fn current_task() -> Option<Arc<Task>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

fn expect_task(caller: &str) -> Arc<Task> {
    match current_task() {
        Some(task) => task,
        None => panic!("{} called outside of a task", caller),
    }
}

/// Handle of the task running on this worker thread, if any
pub fn try_current_handle() -> Option<TaskHandle> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|task| task.handle()))
}

/// Handle of the task running on this worker thread
///
/// # Panics
///
/// Panics when called outside of a task.
pub fn current_handle() -> TaskHandle {
    match try_current_handle() {
        Some(handle) => handle,
        None => panic!("current_handle() called outside of a task"),
    }
}

/// Suspend the current task until another task resumes it by handle
///
/// The `Blocked` status is published on the first poll, before the worker
/// thread is given back, so a resume issued after the caller is observably
/// blocked is never lost.
///
/// ```ignore
/// let me = spindle_core::current_handle();
/// waiters.lock().push(me);
/// spindle_core::block().await;
/// ```
///
/// # Panics
///
/// Panics when polled outside of a task, or when the task is not `Running`
/// (for example two `block()` futures polled in the same poll).
pub fn block() -> Block {
    Block { parked: None }
}

/// Future returned by [`block`]
///
/// Dropping it after the first poll, before the task is resumed, cancels
/// the suspend: the task goes back to `Running` and keeps executing. A
/// resume that already landed is kept and the task is rescheduled.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Block {
    /// Set between the `Blocked` transition and the resumed poll
    parked: Option<Arc<Task>>,
}

impl Future for Block {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let task = expect_task("block()");

        // Re-polled only after a resume and a fresh dispatch
        if self.parked.take().is_some() {
            return Poll::Ready(());
        }

        if let Err(status) = task.state().transition_to_blocked() {
            panic!(
                "block() called by task {} while {:?}; only a running task may block",
                task.handle(),
                status
            );
        }
        task.record_block();
        tracing::trace!(task = %task.handle(), "blocked");
        self.parked = Some(task);
        Poll::Pending
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(task) = self.parked.take() {
            if task.state().cancel_block() {
                tracing::trace!(task = %task.handle(), "block cancelled");
            }
        }
    }
}

/// Give the worker thread back without blocking; the task stays runnable
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`]
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Clear the current task's wake marker after it has been resumed
///
/// Diagnostic hook for code layered on top of the block/wake core. The
/// status machine itself is left untouched.
///
/// # Panics
///
/// Panics when called outside of a task.
pub fn clear_status() -> SchedResult<()> {
    let task = expect_task("clear_status()");
    if task.take_woken() {
        Ok(())
    } else {
        Err(SchedError::NotWoken(task.handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskStatus;
    use std::task::Waker;

    fn create_test_task() -> Arc<Task> {
        Arc::new(Task::new(Box::pin(async {})))
    }

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn test_outside_task_context() {
        assert_eq!(try_current_handle(), None);
    }

    #[test]
    #[should_panic(expected = "current_handle() called outside of a task")]
    fn test_current_handle_outside_task_panics() {
        current_handle();
    }

    #[test]
    #[should_panic(expected = "block() called outside of a task")]
    fn test_block_outside_task_panics() {
        let mut fut = block();
        let _ = poll_once(&mut fut);
    }

    #[test]
    #[should_panic(expected = "clear_status() called outside of a task")]
    fn test_clear_status_outside_task_panics() {
        let _ = clear_status();
    }

    #[test]
    fn test_enter_restores_previous() {
        let outer = create_test_task();
        let inner = create_test_task();
        {
            let _outer = enter(outer.clone());
            assert_eq!(current_handle(), outer.handle());
            {
                let _inner = enter(inner.clone());
                assert_eq!(current_handle(), inner.handle());
            }
            assert_eq!(current_handle(), outer.handle());
        }
        assert_eq!(try_current_handle(), None);
    }

    #[test]
    fn test_block_transitions_running_task() {
        let task = create_test_task();
        task.state().transition_to_running().unwrap();
        let _guard = enter(task.clone());

        let mut fut = block();
        assert!(poll_once(&mut fut).is_pending());
        assert_eq!(task.status(), TaskStatus::Blocked);
        assert_eq!(task.info().blocks, 1);

        // Resume, release and re-dispatch the way a worker would
        task.state().transition_to_runnable().unwrap();
        task.state().release();
        task.state().transition_to_running().unwrap();
        assert!(poll_once(&mut fut).is_ready());
    }

    #[test]
    #[should_panic(expected = "only a running task may block")]
    fn test_block_twice_in_one_poll_panics() {
        let task = create_test_task();
        task.state().transition_to_running().unwrap();
        let _guard = enter(task);

        let mut first = block();
        let mut second = block();
        let _ = poll_once(&mut first);
        let _ = poll_once(&mut second);
    }

    #[test]
    fn test_dropped_block_restores_running() {
        let task = create_test_task();
        task.state().transition_to_running().unwrap();
        let _guard = enter(task.clone());

        let mut fut = block();
        assert!(poll_once(&mut fut).is_pending());
        drop(fut);
        assert_eq!(task.status(), TaskStatus::Running);

        // The task may block again in the same poll
        let mut again = block();
        assert!(poll_once(&mut again).is_pending());
        assert_eq!(task.status(), TaskStatus::Blocked);
        assert_eq!(task.info().blocks, 2);
    }

    #[test]
    fn test_dropped_block_after_resume_stays_runnable() {
        let task = create_test_task();
        task.state().transition_to_running().unwrap();
        let _guard = enter(task.clone());

        let mut fut = block();
        assert!(poll_once(&mut fut).is_pending());
        task.state().transition_to_runnable().unwrap();
        drop(fut);

        assert_eq!(task.status(), TaskStatus::Runnable);
        assert!(task.info().woken);
    }

    #[test]
    fn test_completed_block_drop_is_noop() {
        let task = create_test_task();
        task.state().transition_to_running().unwrap();
        let _guard = enter(task.clone());

        let mut fut = block();
        assert!(poll_once(&mut fut).is_pending());
        task.state().transition_to_runnable().unwrap();
        task.state().release();
        task.state().transition_to_running().unwrap();
        assert!(poll_once(&mut fut).is_ready());
        drop(fut);

        assert_eq!(task.status(), TaskStatus::Running);
        let mut next = block();
        assert!(poll_once(&mut next).is_pending());
        assert_eq!(task.status(), TaskStatus::Blocked);
    }

    #[test]
    fn test_clear_status_requires_wake() {
        let task = create_test_task();
        let _guard = enter(task.clone());

        assert_eq!(clear_status(), Err(SchedError::NotWoken(task.handle())));

        task.state().transition_to_running().unwrap();
        task.state().transition_to_blocked().unwrap();
        task.state().transition_to_runnable().unwrap();
        assert_eq!(clear_status(), Ok(()));
        assert_eq!(clear_status(), Err(SchedError::NotWoken(task.handle())));
        assert!(!task.info().woken);
    }

    #[test]
    fn test_yield_now_pends_once() {
        let mut fut = yield_now();
        assert!(poll_once(&mut fut).is_pending());
        assert!(poll_once(&mut fut).is_ready());
    }
}
