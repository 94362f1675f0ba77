use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;

use distributor_cli::{to_json, to_text, write_file_atomic, DistributionStore, DistributorConfig};

use super::open_store;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    /// Single-row CSV interchange artifact
    Csv,
    /// Pretty-printed JSON document
    Json,
}

#[derive(Args, Debug)]
pub struct Cli {
    /// Distribution id
    #[arg(long)]
    id: u64,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Format::Csv)]
    format: Format,

    /// Store directory (defaults to the configured one)
    #[arg(short, long)]
    store: Option<PathBuf>,
}

pub fn run(args: Cli, config: &DistributorConfig) -> Result<()> {
    let store = open_store(args.store.as_ref(), config)?;
    let document = store
        .get(args.id)
        .with_context(|| format!("Failed to load distribution {}", args.id))?;

    let contents = match args.format {
        Format::Csv => to_text(&document),
        Format::Json => to_json(&document),
    }
    .context("Failed to encode distribution")?;

    println!("Writing distribution {} to {:?}...", args.id, args.output);
    write_file_atomic(&args.output, &contents).context("Failed to write export")?;
    println!("Done!");
    Ok(())
}
