//! Tracing subscriber setup.
//!
//! Diagnostics always go to stderr so stdout stays free for the weight stream.
//! A daily rolling file can be added on top.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::LoggingConfig;
use crate::error::{LipSyncError, Result};

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "lipsync-host.log";

/// Build the filter: `RUST_LOG` wins, then the configured directive.
///
/// # Errors
///
/// Returns [`LipSyncError::Config`] if the configured directive does not parse.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| LipSyncError::Config(format!("logging.filter: {e}"))),
    }
}

/// Install the global subscriber.
///
/// When `log_dir` is set, a daily rolling file is written there as well. The
/// returned guard flushes the file writer on drop and must be kept alive for
/// the life of the process.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log directory cannot be
/// created, or a global subscriber is already installed.
pub fn init(config: &LoggingConfig, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LipSyncError::Config(format!("cannot install logger: {e}")))?;

    Ok(guard)
}
