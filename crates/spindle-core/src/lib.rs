//! Spindle Core Runtime
//!
//! This crate provides the block/wake core of a goroutine-style scheduler:
//! - Task registry with a lock-free per-task status machine
//! - `block()` / `resume(handle)` with no missed wakeups across workers
//! - Work-stealing worker threads that drive task futures
//! - Self-identification of the running task (`current_handle()`)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{SchedError, SchedResult};
pub use scheduler::{
    block, clear_status, current_handle, try_current_handle, yield_now, Block, JoinHandle, Scheduler,
    SchedulerHandle, SchedulerStats, TaskHandle, TaskInfo, TaskOutcome, TaskStatus, YieldNow,
};
