//! Command-line arguments shared by provider and caller programs.

use std::path::PathBuf;

use clap::Parser;

/// Arguments accepted by every program built on this crate.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "beacon-rpc service process")]
pub struct RpcArgs {
    /// Configuration file (key=value lines)
    #[arg(short = 'i', long = "config", value_name = "FILE")]
    pub config: PathBuf,
}
