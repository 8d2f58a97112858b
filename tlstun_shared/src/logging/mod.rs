//! Logging module for tlstun.
//!
//! Structured logging through `tracing`, written to stdout and optionally to
//! a daily rolling file. `RUST_LOG` directives are honoured on top of the
//! configured level.

use tracing::Level;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level (default: INFO)
    pub level: Level,

    /// Whether to log to stdout (default: true)
    pub log_to_stdout: bool,

    /// Whether to log to a file (default: false)
    pub log_to_file: bool,

    /// Directory to store log files (default: "./logs")
    pub log_dir: String,

    /// Base filename for log files (default: "tlstun")
    pub log_file_name: String,

    /// Whether to use JSON format for logs (default: false)
    pub json_format: bool,

    /// Whether to include file and line information (default: false)
    pub include_file_line: bool,

    /// Whether to include span events (default: false)
    pub include_span_events: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            log_to_stdout: true,
            log_to_file: false,
            log_dir: "./logs".to_string(),
            log_file_name: "tlstun".to_string(),
            json_format: false,
            include_file_line: false,
            include_span_events: false,
        }
    }
}

/// Map a level name to a [`Level`], falling back to INFO.
pub fn parse_level(name: &str) -> Level {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with the given options.
///
/// Returns a guard that must be kept alive for the duration of the program
/// to ensure file logs are flushed properly.
///
/// # Examples
///
/// ```
/// use tlstun_shared::logging::{init_logging, LogOptions};
/// use tracing::Level;
///
/// let options = LogOptions {
///     level: Level::DEBUG,
///     ..Default::default()
/// };
///
/// let _guard = init_logging(options);
/// ```
pub fn init_logging(options: LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(options.level.into());

    let span_events = if options.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut guard = None;

    if options.log_to_stdout {
        let stdout_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_span_events(span_events.clone())
            .with_target(true);

        let stdout_layer = if options.json_format {
            stdout_layer.json().boxed()
        } else {
            stdout_layer.boxed()
        };

        layers.push(stdout_layer);
    }

    if options.log_to_file {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &options.log_dir, &options.log_file_name);

        let (non_blocking, worker_guard) = NonBlocking::new(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_span_events(span_events)
            .with_target(true)
            .with_ansi(false)
            .with_writer(non_blocking);

        let file_layer = if options.json_format {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        };

        layers.push(file_layer);
    }

    // Ignore the error if a subscriber is already set in this process
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init();

    guard
}

/// Initialize logging with default options.
pub fn init_default_logging() -> Option<WorkerGuard> {
    init_logging(LogOptions::default())
}

/// Initialize stdout logging at the level named in the configuration.
///
/// # Examples
///
/// ```
/// use tlstun_shared::logging::init_logging_from_config;
/// use tlstun_shared::config::Config;
///
/// let config = Config::default();
/// let _guard = init_logging_from_config(&config);
/// ```
pub fn init_logging_from_config(config: &crate::config::Config) -> Option<WorkerGuard> {
    init_logging(LogOptions {
        level: parse_level(&config.log_level),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tracing::{debug, error, info, trace, warn};

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_init_logging() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap().to_string();

        let options = LogOptions {
            level: Level::TRACE,
            log_to_stdout: false,
            log_to_file: true,
            log_dir,
            log_file_name: "test.log".to_string(),
            ..Default::default()
        };

        let _guard = init_logging(options);

        trace!("This is a trace message");
        debug!("This is a debug message");
        info!(packets_sent = 3, packets_received = 3, "Statistics");
        warn!("This is a warning message");
        error!("This is an error message");

        // The rolling appender creates its file on construction
        let entries = fs::read_dir(dir.path()).unwrap();
        assert!(entries.count() > 0);
    }
}
