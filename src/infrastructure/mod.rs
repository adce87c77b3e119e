//! Infrastructure layer
//!
//! Configuration, logging and metrics around the engine.

mod config;
mod logging;
mod metrics;

pub use config::{Config, ConfigError};
pub use logging::{LOG_ENV, init_logging, log_filter};
pub use metrics::{DEFAULT_RETENTION, MetricsCollector, RunMetrics};
