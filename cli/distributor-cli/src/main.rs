#![forbid(unsafe_code)]
#![allow(unreachable_pub)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use distributor_cli::DistributorConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "distributor")]
#[command(about = "Reward distribution Merkle commitment tools", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and store a new distribution from a claims CSV
    Publish(commands::publish::Cli),
    /// Write the verifier payload for one account
    Claim(commands::claim::Cli),
    /// Check an artifact's integrity and, optionally, its on-chain root
    Verify(commands::verify::Cli),
    /// Export a stored distribution as CSV or JSON
    Export(commands::export::Cli),
    /// Apply observed redemption events to stored distributions
    Redeem(commands::redeem::Cli),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = DistributorConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Publish(args) => commands::publish::run(args, &config)?,
        Commands::Claim(args) => commands::claim::run(args, &config)?,
        Commands::Verify(args) => commands::verify::run(&args, &config)?,
        Commands::Export(args) => commands::export::run(args, &config)?,
        Commands::Redeem(args) => commands::redeem::run(args, &config)?,
    }

    Ok(())
}
