//! Process startup: arguments, configuration, telemetry.
//!
//! # Example
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = beacon_rpc::bootstrap::init()?;
//!     let registry = beacon_rpc::registry::connect(app.config()).await?;
//!     // ...
//!     app.shutdown();
//!     Ok(())
//! }
//! ```

use clap::Parser;
use thiserror::Error;

use crate::cli::RpcArgs;
use crate::config::RpcConfig;
use crate::error::ConfigError;
use crate::logger::LogGuard;
use crate::telemetry::{self, TelemetryError};

/// Startup failure. Always fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The configuration file is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Logging could not be set up.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Initialised process state, passed explicitly to whatever needs it.
#[derive(Debug)]
pub struct Bootstrap {
    config: RpcConfig,
    log_guard: LogGuard,
}

impl Bootstrap {
    /// Loaded configuration.
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Flush pending log lines and stop the log thread.
    pub fn shutdown(self) {
        self.log_guard.shutdown();
    }
}

/// Parse the command line, load the configuration and start telemetry.
///
/// Invalid arguments print usage and exit the process with a non-zero
/// status.
pub fn init() -> Result<Bootstrap, BootstrapError> {
    init_with(&RpcArgs::parse())
}

/// Same as [`init`] with already parsed arguments.
pub fn init_with(args: &RpcArgs) -> Result<Bootstrap, BootstrapError> {
    let config = RpcConfig::load(&args.config)?;
    let log_guard = telemetry::init(&config)?;

    tracing::info!(
        "configuration {} loaded: provider {}, registry {} ({})",
        args.config.display(),
        config.rpc_endpoint(),
        config.registry_endpoint(),
        config.registry_backend
    );

    Ok(Bootstrap { config, log_guard })
}
