//! Structured logging with tracing
//!
//! Sets up:
//! - Console logging, text or JSON
//! - JSON file logging with daily rotation
//! - Level filtering from RUST_LOG

use super::config::{LogFormat, MonitoringConfig};
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub const LOG_FILE_NAME: &str = "trpg.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the global tracing subscriber.
///
/// Returns the file writer guard when file logging is on. Dropping the guard
/// stops file logging, so keep it alive for the duration of the program.
pub fn init_tracing(config: &MonitoringConfig) -> std::io::Result<Option<WorkerGuard>> {
    if !config.enabled {
        return Ok(None);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.enable_console_logging {
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true);
        layers.push(match config.log_format {
            LogFormat::Json => console.json().boxed(),
            LogFormat::Text => console.with_file(true).with_line_number(true).boxed(),
        });
    }

    if config.enable_file_logging {
        config.ensure_log_dir()?;
        let (writer, file_guard) = non_blocking(daily(&config.log_dir, LOG_FILE_NAME));
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed(),
        );
        guard = Some(file_guard);
    }

    // A subscriber may already be installed (tests, embedding binaries).
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init();

    Ok(guard)
}

/// Log a finished request with structured fields
///
/// Usage:
/// ```rust,ignore
/// log_request!(request_id, "GET", "/health", 200, 1.5);
/// ```
#[macro_export]
macro_rules! log_request {
    ($request_id:expr, $method:expr, $path:expr, $status:expr, $duration_ms:expr) => {
        tracing::info!(
            request_id = %$request_id,
            method = %$method,
            path = %$path,
            status = $status,
            duration_ms = $duration_ms,
            "API Request"
        );
    };
}
