//! Parenchym CLI
//!
//! Command-line administration of the authorization directory.

#![warn(clippy::all)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use pym_cli::Cli;
use pym_core::{ConfigManager, PymConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PymConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins, then --verbose, then the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(&config.logging.level)
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(command = ?cli.command, data = ?cli.data, "Running");
    let out = pym_cli::run(cli, config).await?;
    if !out.is_empty() {
        println!("{out}");
    }
    Ok(())
}
