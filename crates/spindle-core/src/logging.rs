//! Logging setup
//!
//! The scheduler emits `tracing` events; nothing is printed until a
//! subscriber is installed.
//!
//! ```rust
//! spindle_core::logging::init();
//! tracing::info!("scheduler starting");
//! ```

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Every dispatch, block and resume
    Trace,
    /// Worker lifecycle and rejected resumes
    Debug,
    /// Informational
    Info,
    /// Aborted tasks
    Warn,
    /// Task panics
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Initialize logging at INFO level
pub fn init() {
    init_with_level(LogLevel::Info);
}

/// Initialize logging with a custom level
///
/// Returns false if a global subscriber was already installed.
pub fn init_with_level(level: LogLevel) -> bool {
    let filter = LevelFilter::from_level(level.into());

    let layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_target(false)
        .compact()
        .with_filter(filter);

    Registry::default().with(layer).try_init().is_ok()
}
