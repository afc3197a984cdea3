//! Tracing subscriber installation.
//!
//! Every `tracing` event goes to stdout and, through a [`LogSink`], to the
//! daily log file. The filter comes from `RUST_LOG` when set, otherwise from
//! the `loglevel` config key.

use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::RpcConfig;
use crate::logger::{LogGuard, LogSink, DEFAULT_QUEUE_CAPACITY};

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter {directive:?}: {message}")]
    Filter {
        /// Offending directive.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// The log directory could not be prepared or the log thread not started.
    #[error("cannot start file logging in {dir}: {source}")]
    Sink {
        /// Log directory.
        dir: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(String),
}

/// Build the filter for `directive`, preferring `RUST_LOG` when it is set.
pub fn env_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive).map_err(|e| TelemetryError::Filter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Install the global subscriber and start the file sink.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops file logging.
pub fn init(config: &RpcConfig) -> Result<LogGuard, TelemetryError> {
    init_with(&config.log_dir, &config.log_level)
}

/// Same as [`init`] with an explicit directory and filter directive.
pub fn init_with(log_dir: &Path, directive: &str) -> Result<LogGuard, TelemetryError> {
    let filter = env_filter(directive)?;

    let (sink, guard) = LogSink::start(log_dir, DEFAULT_QUEUE_CAPACITY, Level::TRACE)
        .map_err(|source| TelemetryError::Sink {
            dir: log_dir.to_path_buf(),
            source,
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(sink))
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_reported() {
        // Only meaningful when RUST_LOG does not override the directive
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = env_filter("beacon_rpc=notalevel").unwrap_err();
        assert!(matches!(err, TelemetryError::Filter { .. }));
        assert!(err.to_string().contains("beacon_rpc=notalevel"));
    }

    #[test]
    fn test_valid_filter() {
        assert!(env_filter("info,beacon_rpc=debug").is_ok());
    }
}
