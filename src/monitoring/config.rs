//! Logging configuration
//!
//! Loads from environment variables:
//! - MONITORING_ENABLED: Enable/disable log output (true/false)
//! - RUST_LOG: Tracing level or filter directives
//! - LOG_FORMAT: Console output format (json or text)
//! - LOG_DIR: Directory for log files (default: <data dir>/trpg/logs)
//! - LOG_FILE_ENABLED: Write the daily JSON log file (true/false)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,

    /// Log level or `EnvFilter` directives
    pub log_level: String,

    /// Console format. Files are always JSON.
    pub log_format: LogFormat,

    pub log_dir: PathBuf,

    pub enable_file_logging: bool,

    pub enable_console_logging: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(&self) -> &str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_dir: Self::default_log_dir(),
            enable_file_logging: true,
            enable_console_logging: true,
        }
    }
}

fn is_true(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

impl MonitoringConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(enabled) = std::env::var("MONITORING_ENABLED") {
            config.enabled = is_true(&enabled);
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.log_level = log_level;
        }

        if let Ok(log_format) = std::env::var("LOG_FORMAT") {
            if let Ok(format) = log_format.parse() {
                config.log_format = format;
            }
        }

        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(file_enabled) = std::env::var("LOG_FILE_ENABLED") {
            config.enable_file_logging = is_true(&file_enabled);
        }

        config
    }

    /// `<platform data dir>/trpg/logs`, or `./.cache/logs` when the platform has none.
    pub fn default_log_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("trpg").join("logs"))
            .unwrap_or_else(|| PathBuf::from(".cache").join("logs"))
    }

    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if !self.log_dir.exists() {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }
}
