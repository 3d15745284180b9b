//! Per-task state word
//!
//! One `AtomicU8` holds the task status in the low two bits, an `ON_WORKER`
//! flag in bit 2 and a `WOKEN` marker in bit 3. `ON_WORKER` is set while a
//! worker thread is polling the task. Every read-modify-write is a CAS on
//! this one word, so a racing resume and the worker's post-poll release are
//! totally ordered: exactly one of them sees the other and enqueues the task.
//!
//! ```text
//! Runnable    --dispatch-->  Running|ON
//! Running|ON  --block----->  Blocked|ON
//! Blocked|ON  --release--->  Blocked       (parked, resume enqueues)
//! Blocked|ON  --resume---->  Runnable|ON   (worker enqueues on release)
//! Blocked|ON  --cancel---->  Running|ON    (Block dropped mid-poll)
//! Blocked     --resume---->  Runnable      (resume enqueues)
//! Running|ON  --release--->  Runnable      (yield, worker enqueues)
//! any         --complete-->  Dead
//! ```
//!
//! `WOKEN` is set by the same CAS that accepts a resume and survives every
//! transition except death, until the task clears it itself.

use crate::scheduler::TaskStatus;
use std::sync::atomic::{AtomicU8, Ordering};

const STATUS_MASK: u8 = 0b0011;
const RUNNABLE: u8 = 0b0000;
const RUNNING: u8 = 0b0001;
const BLOCKED: u8 = 0b0010;
const DEAD: u8 = 0b0011;
const ON_WORKER: u8 = 0b0100;
const WOKEN: u8 = 0b1000;

fn decode(bits: u8) -> TaskStatus {
    match bits & STATUS_MASK {
        RUNNABLE => TaskStatus::Runnable,
        RUNNING => TaskStatus::Running,
        BLOCKED => TaskStatus::Blocked,
        _ => TaskStatus::Dead,
    }
}

/// What the worker must do with a task after a `Pending` poll
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Release {
    /// Task is fully parked; a later resume enqueues it
    Parked,
    /// Task yielded, or was resumed before the poll returned; the worker enqueues it
    Reschedule,
}

/// What a successful resume must do
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Task was fully parked; the caller enqueues it
    Enqueue,
    /// A worker still holds the task and enqueues it on release
    Deferred,
}

/// Lock-free status word of one task
#[derive(Debug)]
pub(crate) struct State {
    bits: AtomicU8,
}

impl State {
    /// New tasks start `Runnable` and unowned
    pub(crate) fn new() -> Self {
        Self {
            bits: AtomicU8::new(RUNNABLE),
        }
    }

    /// Current status
    pub(crate) fn status(&self) -> TaskStatus {
        decode(self.bits.load(Ordering::Acquire))
    }

    /// Whether a worker is currently polling the task
    #[cfg(test)]
    pub(crate) fn is_on_worker(&self) -> bool {
        self.bits.load(Ordering::Acquire) & ON_WORKER != 0
    }

    /// Whether an accepted resume has not been cleared yet
    pub(crate) fn is_woken(&self) -> bool {
        self.bits.load(Ordering::Acquire) & WOKEN != 0
    }

    fn update<F>(&self, mut f: F) -> Result<u8, u8>
    where
        F: FnMut(u8) -> Option<u8>,
    {
        self.bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| f(current))
    }

    /// `Runnable → Running`, taking ownership for one poll
    ///
    /// Fails with the observed status if the task is not a dispatchable
    /// `Runnable` (which only happens for a task marked dead at shutdown).
    pub(crate) fn transition_to_running(&self) -> Result<(), TaskStatus> {
        self.update(|current| {
            (current & (STATUS_MASK | ON_WORKER) == RUNNABLE)
                .then_some((current & WOKEN) | RUNNING | ON_WORKER)
        })
        .map(|_| ())
        .map_err(decode)
    }

    /// `Running → Blocked`, called by the task itself in the middle of a poll
    ///
    /// The new status is published before the poll returns, so a resume
    /// issued from here on is never dropped.
    pub(crate) fn transition_to_blocked(&self) -> Result<(), TaskStatus> {
        self.update(|current| {
            (current & (STATUS_MASK | ON_WORKER) == RUNNING | ON_WORKER)
                .then_some((current & WOKEN) | BLOCKED | ON_WORKER)
        })
        .map(|_| ())
        .map_err(decode)
    }

    /// `Blocked → Running` while the worker still polls the task
    ///
    /// Undoes a suspend whose `Block` future was dropped before the poll
    /// returned. False if the status was no longer `Blocked|ON_WORKER`: a
    /// resume already made the task `Runnable` (release then reschedules it)
    /// or the suspend had completed.
    pub(crate) fn cancel_block(&self) -> bool {
        self.update(|current| {
            (current & (STATUS_MASK | ON_WORKER) == BLOCKED | ON_WORKER)
                .then_some((current & WOKEN) | RUNNING | ON_WORKER)
        })
        .is_ok()
    }

    /// `Blocked → Runnable`, setting the wake marker
    ///
    /// Fails with the observed status when the task is not blocked.
    pub(crate) fn transition_to_runnable(&self) -> Result<Wake, TaskStatus> {
        let prev = self
            .update(|current| {
                (current & STATUS_MASK == BLOCKED)
                    .then_some((current & ON_WORKER) | WOKEN | RUNNABLE)
            })
            .map_err(decode)?;

        if prev & ON_WORKER != 0 {
            Ok(Wake::Deferred)
        } else {
            Ok(Wake::Enqueue)
        }
    }

    /// Drop worker ownership after a `Pending` poll
    ///
    /// `Running` becomes `Runnable` (yield); `Blocked` stays parked; a
    /// `Runnable` left by a resume inside the suspend window is handed back
    /// to the worker for enqueueing.
    pub(crate) fn release(&self) -> Release {
        let prev = self
            .update(|current| {
                let woken = current & WOKEN;
                match current & STATUS_MASK {
                    DEAD => None,
                    BLOCKED => Some(woken | BLOCKED),
                    _ => Some(woken | RUNNABLE),
                }
            })
            .unwrap_or(DEAD);

        match prev & STATUS_MASK {
            BLOCKED => Release::Parked,
            DEAD => Release::Parked,
            _ => Release::Reschedule,
        }
    }

    /// Consume the wake marker; false if there was none
    pub(crate) fn take_woken(&self) -> bool {
        self.bits.fetch_and(!WOKEN, Ordering::AcqRel) & WOKEN != 0
    }

    /// Terminal transition; clears ownership and the wake marker
    pub(crate) fn transition_to_dead(&self) -> TaskStatus {
        decode(self.bits.swap(DEAD, Ordering::AcqRel))
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn running() -> State {
        let state = State::new();
        state.transition_to_running().unwrap();
        state
    }

    #[test]
    fn test_initial_state() {
        let state = State::new();
        assert_eq!(state.status(), TaskStatus::Runnable);
        assert!(!state.is_on_worker());
    }

    #[test]
    fn test_dispatch() {
        let state = running();
        assert_eq!(state.status(), TaskStatus::Running);
        assert!(state.is_on_worker());

        // A running task cannot be dispatched twice
        assert_eq!(state.transition_to_running(), Err(TaskStatus::Running));
    }

    #[test]
    fn test_block_then_park_then_resume() {
        let state = running();
        state.transition_to_blocked().unwrap();
        assert_eq!(state.status(), TaskStatus::Blocked);
        assert!(state.is_on_worker());

        assert_eq!(state.release(), Release::Parked);
        assert_eq!(state.status(), TaskStatus::Blocked);
        assert!(!state.is_on_worker());

        assert_eq!(state.transition_to_runnable(), Ok(Wake::Enqueue));
        assert_eq!(state.status(), TaskStatus::Runnable);
        state.transition_to_running().unwrap();
    }

    #[test]
    fn test_resume_inside_suspend_window() {
        let state = running();
        state.transition_to_blocked().unwrap();

        // Worker has not released the task yet: the resume must not enqueue
        assert_eq!(state.transition_to_runnable(), Ok(Wake::Deferred));
        assert_eq!(state.status(), TaskStatus::Runnable);
        assert!(state.is_on_worker());

        // The worker picks the wakeup up on release
        assert_eq!(state.release(), Release::Reschedule);
        assert_eq!(state.status(), TaskStatus::Runnable);
        assert!(!state.is_on_worker());
        state.transition_to_running().unwrap();
    }

    #[test]
    fn test_wake_marker_survives_dispatch() {
        let state = running();
        state.transition_to_blocked().unwrap();
        state.release();
        assert!(!state.is_woken());

        state.transition_to_runnable().unwrap();
        assert!(state.is_woken());
        state.transition_to_running().unwrap();
        assert!(state.is_woken());

        assert!(state.take_woken());
        assert!(!state.take_woken());
        assert_eq!(state.status(), TaskStatus::Running);
    }

    #[test]
    fn test_dead_clears_wake_marker() {
        let state = running();
        state.transition_to_blocked().unwrap();
        state.transition_to_runnable().unwrap();
        state.transition_to_dead();
        assert!(!state.is_woken());
    }

    #[test]
    fn test_cancel_block_restores_running() {
        let state = running();
        state.transition_to_blocked().unwrap();

        assert!(state.cancel_block());
        assert_eq!(state.status(), TaskStatus::Running);
        assert!(state.is_on_worker());

        // Back to a plain yield: the worker reschedules it
        assert_eq!(state.release(), Release::Reschedule);
    }

    #[test]
    fn test_cancel_block_after_resume_keeps_wakeup() {
        let state = running();
        state.transition_to_blocked().unwrap();
        assert_eq!(state.transition_to_runnable(), Ok(Wake::Deferred));

        assert!(!state.cancel_block());
        assert_eq!(state.status(), TaskStatus::Runnable);
        assert!(state.is_woken());
        assert_eq!(state.release(), Release::Reschedule);
    }

    #[test]
    fn test_cancel_block_ignores_parked_task() {
        let state = running();
        state.transition_to_blocked().unwrap();
        state.release();

        assert!(!state.cancel_block());
        assert_eq!(state.status(), TaskStatus::Blocked);
        assert!(!running().cancel_block());
    }

    #[test]
    fn test_yield_release() {
        let state = running();
        assert_eq!(state.release(), Release::Reschedule);
        assert_eq!(state.status(), TaskStatus::Runnable);
    }

    #[test]
    fn test_resume_not_blocked() {
        let state = State::new();
        assert_eq!(state.transition_to_runnable(), Err(TaskStatus::Runnable));

        let state = running();
        assert_eq!(state.transition_to_runnable(), Err(TaskStatus::Running));

        state.transition_to_dead();
        assert_eq!(state.transition_to_runnable(), Err(TaskStatus::Dead));
    }

    #[test]
    fn test_double_resume_single_wake() {
        let state = running();
        state.transition_to_blocked().unwrap();
        state.release();

        assert_eq!(state.transition_to_runnable(), Ok(Wake::Enqueue));
        assert_eq!(state.transition_to_runnable(), Err(TaskStatus::Runnable));
    }

    #[test]
    fn test_block_requires_running() {
        let state = State::new();
        assert_eq!(state.transition_to_blocked(), Err(TaskStatus::Runnable));

        let state = running();
        state.transition_to_blocked().unwrap();
        assert_eq!(state.transition_to_blocked(), Err(TaskStatus::Blocked));
    }

    #[test]
    fn test_dead_is_terminal() {
        let state = running();
        assert_eq!(state.transition_to_dead(), TaskStatus::Running);
        assert_eq!(state.status(), TaskStatus::Dead);
        assert!(!state.is_on_worker());
        assert_eq!(state.transition_to_running(), Err(TaskStatus::Dead));
        assert_eq!(state.transition_to_blocked(), Err(TaskStatus::Dead));
    }

    #[test]
    fn test_racing_resumes_single_winner() {
        for _ in 0..200 {
            let state = Arc::new(running());
            state.transition_to_blocked().unwrap();

            let resumers: Vec<_> = (0..4)
                .map(|_| {
                    let state = state.clone();
                    thread::spawn(move || state.transition_to_runnable().is_ok())
                })
                .collect();

            state.release();
            let winners = resumers
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();

            assert_eq!(winners, 1);
            assert_eq!(state.status(), TaskStatus::Runnable);
            assert!(!state.is_on_worker());
        }
    }

    #[test]
    fn test_resume_vs_release_exactly_one_enqueue() {
        for _ in 0..500 {
            let state = Arc::new(running());
            state.transition_to_blocked().unwrap();

            let resumer = {
                let state = state.clone();
                thread::spawn(move || state.transition_to_runnable())
            };
            let release = state.release();
            let wake = resumer.join().unwrap().unwrap();

            let enqueues = (release == Release::Reschedule) as u32 + (wake == Wake::Enqueue) as u32;
            assert_eq!(enqueues, 1, "release={:?} wake={:?}", release, wake);
        }
    }
}
