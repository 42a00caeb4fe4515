//! Logging setup
//!
//! Human readable output goes to stderr so it never mixes with data printed
//! on stdout (YAML configuration, listings). A second, non-blocking layer
//! appends to the log file under the data directory. `RUST_LOG` overrides the
//! level chosen on the command line.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keeps the file writer alive; dropping it flushes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize logging with stderr output and, when possible, a log file.
///
/// A log file that cannot be created is not fatal: logging falls back to
/// stderr only.
pub fn init_logging(verbose: bool, log_file: &Path) -> LoggingGuard {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();

    let file_writer = log_file
        .parent()
        .zip(log_file.file_name())
        .and_then(|(dir, name)| {
            std::fs::create_dir_all(dir).ok()?;
            Some(tracing_appender::rolling::never(dir, name))
        })
        .map(tracing_appender::non_blocking);

    match file_writer {
        Some((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            LoggingGuard {
                _file_guard: Some(guard),
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            LoggingGuard { _file_guard: None }
        }
    }
}
