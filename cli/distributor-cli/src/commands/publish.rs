use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use num_bigint::BigUint;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use distributor_cli::{
    assemble_claims, parse_address, parse_amount, publish_new, to_text, write_file_atomic,
    Address, DistributorConfig, Metadata,
};

use super::open_store;

#[derive(Args, Debug)]
pub struct Cli {
    /// Input CSV with `account,amount` columns, in claim order
    #[arg(short, long)]
    input: PathBuf,

    /// Store directory (defaults to the configured one)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Account to exclude; may be repeated, adds to the configured list
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Description recorded in the document metadata
    #[arg(long)]
    source: Option<String>,

    /// Also write the CSV interchange artifact here
    #[arg(short, long)]
    artifact: Option<PathBuf>,

    /// Also write the Merkle root here
    #[arg(short, long)]
    root_output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct EntryRow {
    account: String,
    amount: String,
}

/// Reads `account,amount` rows. Blank lines are skipped by the CSV reader.
pub fn read_entries(path: &Path) -> Result<Vec<(Address, BigUint)>> {
    let file = File::open(path).context("Failed to open input file")?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut entries = Vec::new();
    for (row_num, row) in reader.deserialize::<EntryRow>().enumerate() {
        let line = row_num + 2;
        let row = row.with_context(|| format!("Invalid row at line {line}"))?;
        let account = parse_address(&row.account)
            .with_context(|| format!("Invalid account at line {line}"))?;
        let amount =
            parse_amount(&row.amount).with_context(|| format!("Invalid amount at line {line}"))?;
        entries.push((account, amount));

        if entries.len() % 1_000_000 == 0 {
            println!("Processed {} entries...", entries.len());
        }
    }
    Ok(entries)
}

pub fn run(args: Cli, config: &DistributorConfig) -> Result<()> {
    let mut excluded: BTreeSet<Address> = config.publish.excluded_accounts.clone();
    for account in &args.exclude {
        excluded.insert(parse_address(account).context("Invalid --exclude address")?);
    }

    println!("Reading entries from {:?}...", args.input);
    let entries = read_entries(&args.input)?;
    println!("Total entries: {}", entries.len());

    let claims = assemble_claims(entries, &excluded).context("Invalid claim set")?;
    println!(
        "Claims after exclusions: {} ({} accounts excluded)",
        claims.len(),
        excluded.len()
    );

    let now = Utc::now();
    let metadata = Metadata {
        generated_at: Some(now),
        source: args
            .source
            .clone()
            .or_else(|| config.publish.source.clone())
            .unwrap_or_else(|| args.input.display().to_string()),
        excluded_accounts: excluded.into_iter().collect(),
        labels: Default::default(),
    };

    let store = open_store(args.store.as_ref(), config)?;
    println!("Building Merkle tree...");
    let document =
        publish_new(&store, claims, metadata, now).context("Failed to publish distribution")?;

    println!("Distribution id: {}", document.id());
    println!("Merkle root: {}", document.merkle_root());
    println!("Total rewards: {}", document.total_rewards());

    if let Some(path) = &args.root_output {
        write_file_atomic(path, &format!("{}\n", document.merkle_root()))
            .context("Failed to write root")?;
    }

    if let Some(path) = &args.artifact {
        println!("Writing artifact to {:?}...", path);
        let text = to_text(&document).context("Failed to encode artifact")?;
        write_file_atomic(path, &text).context("Failed to write artifact")?;
    }

    println!("Done!");
    Ok(())
}
