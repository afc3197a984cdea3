//! beacon-registry - standalone coordination service.
//!
//! Providers publish their methods here as ephemeral nodes; callers look
//! them up. Point `zookeeperip` / `zookeeperport` in the RPC configuration
//! at this process.

use std::path::PathBuf;
use std::time::Duration;

use beacon_rpc::registry::CoordinatorServer;
use beacon_rpc::telemetry;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "beacon-registry")]
#[command(about = "Coordination service for beacon-rpc service discovery")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "2181")]
    port: u16,

    /// Session timeout in milliseconds
    #[arg(long, default_value = "6000")]
    session_timeout_ms: u64,

    /// Directory for daily log files
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let log_guard = telemetry::init_with(&args.log_dir, &args.log_level)?;

    let addr = format!("{}:{}", args.host, args.port);
    let session_timeout = Duration::from_millis(args.session_timeout_ms.max(1));
    let handle = CoordinatorServer::new(session_timeout).bind(&addr).await?;
    info!("beacon-registry ready on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    handle.shutdown().await;

    log_guard.shutdown();
    Ok(())
}
