//! Blobgate CLI binary.
//!
//! Command-line access to a configured gateway:
//! - Upload, download and delete objects
//! - List objects and print access URLs
//! - Inspect backend and cache counters

use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use cli::{Cli, handle_command};

    // Parse command-line arguments
    let cli = Cli::parse();

    blobgate::init_telemetry(cli.log_format, cli.verbose)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config = blobgate::GatewayConfig::load(cli.config.as_deref())?;
    tracing::debug!(backend = %config.storage().backend(), "Configuration loaded");

    handle_command(cli.command, &config).await
}
