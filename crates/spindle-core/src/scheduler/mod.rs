//! Task Scheduler
//!
//! Worker threads drive task futures taken from a shared injector and
//! per-worker work-stealing deques. A task suspends with [`block`] and is
//! made runnable again by [`SchedulerHandle::resume`].

mod context;
mod deque;
mod registry;
#[allow(clippy::module_inception)]
mod scheduler;
mod state;
mod task;
mod worker;

pub use context::{block, clear_status, current_handle, try_current_handle, yield_now, Block, YieldNow};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
pub use task::{JoinHandle, TaskHandle, TaskInfo, TaskOutcome, TaskStatus};

pub(crate) use task::Task;
