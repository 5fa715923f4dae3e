//! Logging setup for the service.
//!
//! Console output goes to stderr; a daily-rotated JSON file is written under
//! the configured log directory when file logging is enabled.

pub mod config;
pub mod tracing_config;

pub use config::{LogFormat, MonitoringConfig};
pub use tracing_config::init_tracing;
