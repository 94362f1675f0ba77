use anyhow::{Context, Result};
use clap::Args;
use std::fs::File;
use std::path::PathBuf;

use distributor_cli::{
    with_retries, DistributionStore, DistributorConfig, ReconcileReport, RedemptionEvent,
};

use super::open_store;

const STORE_ATTEMPTS: u32 = 3;

#[derive(Args, Debug)]
pub struct Cli {
    /// CSV of `distribution_id,account,amount,timestamp` redemption events
    #[arg(short, long)]
    events: PathBuf,

    /// Store directory (defaults to the configured one)
    #[arg(short, long)]
    store: Option<PathBuf>,
}

pub fn run(args: Cli, config: &DistributorConfig) -> Result<()> {
    let store = open_store(args.store.as_ref(), config)?;

    println!("Reading events from {:?}...", args.events);
    let file = File::open(&args.events).context("Failed to open events file")?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut report = ReconcileReport::default();
    let mut malformed = 0usize;
    for (row_num, row) in reader.deserialize::<RedemptionEvent>().enumerate() {
        let event = match row {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(line = row_num + 2, error = %err, "malformed redemption event");
                malformed += 1;
                continue;
            }
        };
        let result = with_retries(STORE_ATTEMPTS, || store.record_event(&event));
        report.record(&event, result);
    }

    println!("Applied: {}", report.applied);
    println!("Duplicates: {}", report.duplicates);
    println!("Rejected: {}", report.failures.len());
    println!("Malformed rows: {malformed}");

    for (event, err) in &report.failures {
        println!(
            "  distribution {} account {}: {err}",
            event.distribution_id, event.account
        );
    }

    if !report.is_clean() || malformed > 0 {
        anyhow::bail!(
            "{} events rejected, {} rows malformed",
            report.failures.len(),
            malformed
        );
    }
    Ok(())
}
