use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use distributor_cli::{
    digest, parse_address, verify, write_file_atomic, DistributionStore, DistributorConfig,
};

use super::open_store;

#[derive(Args, Debug)]
pub struct Cli {
    /// Distribution id
    #[arg(long)]
    id: u64,

    /// Claimant account
    #[arg(short, long)]
    account: String,

    /// Output JSON file
    #[arg(short, long)]
    output: PathBuf,

    /// Store directory (defaults to the configured one)
    #[arg(short, long)]
    store: Option<PathBuf>,
}

pub fn run(args: Cli, config: &DistributorConfig) -> Result<()> {
    let account = parse_address(&args.account).context("Invalid account address")?;

    println!("Loading distribution {}...", args.id);
    let store = open_store(args.store.as_ref(), config)?;
    let document = store
        .get(args.id)
        .with_context(|| format!("Failed to load distribution {}", args.id))?;

    println!("Looking up {account}...");
    let payload = document
        .claim_payload(&account)
        .context("Address not found in distribution")?;

    let leaf = digest(&payload.claim()).context("Failed to hash claim")?;
    if !verify(&payload.proof, &leaf, &payload.merkle_root) {
        anyhow::bail!(
            "Stored proof for {} does not verify against {}",
            account,
            payload.merkle_root
        );
    }

    println!("Writing claim JSON to {:?}...", args.output);
    let json = serde_json::to_string_pretty(&payload).context("Failed to serialize JSON")?;
    write_file_atomic(&args.output, &json).context("Failed to write claim file")?;

    println!("\nClaim generated successfully!");
    println!("Index: {}", payload.index);
    println!("Amount: {}", payload.amount);
    println!("Proof length: {} nodes", payload.proof.len());

    Ok(())
}
