//! Scheduler errors

use crate::scheduler::{TaskHandle, TaskStatus};

/// Errors reported across the scheduler boundary
///
/// Misuse of the suspend path (blocking outside a running task) is not
/// represented here: it panics, since it means a caller broke the status
/// machine's invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// Handle does not refer to a live task (never spawned, or already dead)
    #[error("Task {0} is not a live task")]
    InvalidHandle(TaskHandle),

    /// Resume target is alive but not blocked
    #[error("Task {handle} is not blocked (status: {status:?})")]
    NotBlocked {
        /// Resume target
        handle: TaskHandle,
        /// Status observed by the rejected resume
        status: TaskStatus,
    },

    /// `clear_status()` called without a wakeup to clear
    #[error("Task {0} has no pending wakeup to clear")]
    NotWoken(TaskHandle),

    /// Live task limit reached
    #[error("Task limit reached: {0} live tasks")]
    TaskLimit(usize),

    /// Scheduler has been shut down
    #[error("Scheduler is shut down")]
    ShutDown,

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// Scheduler operation result
pub type SchedResult<T> = Result<T, SchedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let handle = TaskHandle::from_u64(7);

        assert_eq!(
            SchedError::InvalidHandle(handle).to_string(),
            "Task #7 is not a live task"
        );
        assert_eq!(
            SchedError::NotBlocked {
                handle,
                status: TaskStatus::Runnable
            }
            .to_string(),
            "Task #7 is not blocked (status: Runnable)"
        );
        assert_eq!(SchedError::TaskLimit(3).to_string(), "Task limit reached: 3 live tasks");
    }
}
