//! FedCloud VM monitor CLI
//!
//! A command-line tool for auditing the VMs a VO runs across federated
//! cloud sites and removing the stale ones after confirmation.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{scan, sites};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// FedCloud VM monitor
#[derive(Parser)]
#[command(name = "fedmon")]
#[command(
    author,
    version,
    about = "Monitor VM lifecycle on federated cloud sites",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/fedmon/config.toml)
    #[arg(long, env = "FEDMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Audit VMs, quotas and unused resources of one or more sites
    Scan(scan::ScanArgs),

    /// List configured sites
    Sites {
        /// Only sites hosting this VO
        #[arg(long)]
        vo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan(args) => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(true);
                }
            });
            scan::run(config, args, cli.format, shutdown_rx).await?;
        }
        Commands::Sites { vo } => {
            sites::list_sites(&config, vo.as_deref(), cli.format)?;
        }
    }

    Ok(())
}
