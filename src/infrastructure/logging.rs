//! Logging configuration
//!
//! Initializes tracing for the application. `STAGELINE_LOG` takes the usual
//! `EnvFilter` directives and wins over the configured level.

use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable overriding the log filter
pub const LOG_ENV: &str = "STAGELINE_LOG";

/// Builds the filter for `level`, preferring `STAGELINE_LOG` when set
#[must_use]
pub fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes logging with the specified level.
///
/// Later calls are ignored so tests and embedding hosts can call it freely.
pub fn init_logging(level: &str) {
    let _ = fmt()
        .with_env_filter(log_filter(level))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init();
}
