//! Scheduler configuration

use std::time::Duration;

/// Environment variable overriding the worker count
pub const WORKERS_ENV: &str = "SPINDLE_WORKERS";

/// Environment variable overriding the live task limit
pub const MAX_TASKS_ENV: &str = "SPINDLE_MAX_TASKS";

/// Default time an idle worker waits for new work before re-checking
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads (0 = one per CPU core)
    pub worker_count: usize,

    /// Maximum live tasks (None = unlimited)
    pub max_tasks: Option<usize>,

    /// How long an idle worker sleeps before polling the queues again
    pub idle_timeout: Duration,

    /// Worker thread name prefix; the worker id is appended
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_tasks: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "spindle-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// One worker thread, no task limit
    pub fn single_threaded() -> Self {
        Self::default().with_workers(1)
    }

    /// Default configuration with `SPINDLE_WORKERS` / `SPINDLE_MAX_TASKS` applied
    pub fn from_env() -> Self {
        Self::default().apply_overrides(
            std::env::var(WORKERS_ENV).ok().as_deref(),
            std::env::var(MAX_TASKS_ENV).ok().as_deref(),
        )
    }

    fn apply_overrides(mut self, workers: Option<&str>, max_tasks: Option<&str>) -> Self {
        if let Some(raw) = workers {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.worker_count = n,
                Err(_) => tracing::warn!(value = raw, "ignoring invalid {}", WORKERS_ENV),
            }
        }
        if let Some(raw) = max_tasks {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_tasks = Some(n),
                _ => tracing::warn!(value = raw, "ignoring invalid {}", MAX_TASKS_ENV),
            }
        }
        self
    }

    /// Set the worker count (0 = one per CPU core)
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Limit the number of live tasks
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = Some(max_tasks);
        self
    }

    /// Set the idle wait
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Worker count with 0 resolved to the CPU count
    pub fn effective_workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }
}
