use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::PathBuf;

use distributor_cli::{ensure_root, from_text_verified, parse_hash, DistributorConfig};

#[derive(Args, Debug)]
pub struct Cli {
    /// CSV interchange artifact
    #[arg(short, long)]
    input: PathBuf,

    /// Root recorded by the on-chain verifier (hex)
    #[arg(short, long)]
    root: Option<String>,
}

pub fn run(args: &Cli, _config: &DistributorConfig) -> Result<()> {
    let expected_root = args
        .root
        .as_deref()
        .map(parse_hash)
        .transpose()
        .context("Invalid Merkle root")?;

    println!("Reading artifact from {:?}...", args.input);
    let text = fs::read_to_string(&args.input).context("Failed to read artifact")?;

    println!("Checking structure and recomputing root...");
    let document = from_text_verified(&text).context("Artifact failed integrity check")?;

    if let Some(expected) = expected_root {
        println!("Comparing against on-chain root {expected}...");
        ensure_root(&document, &expected).context("On-chain root does not match artifact")?;
    }

    println!("\nArtifact verified.");
    println!("Distribution id: {}", document.id());
    println!("Merkle root: {}", document.merkle_root());
    println!("Claims: {}", document.claim_count());
    println!("Total rewards: {}", document.total_rewards());
    println!(
        "Redeemed: {} claims, {} tokens",
        document.claimed_count(),
        document.claimed_rewards()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use distributor_cli::{publish, to_text, Address, Claim, Metadata};

    fn write_artifact(dir: &std::path::Path) -> (PathBuf, String) {
        let claims = (1..=3u8)
            .map(|n| Claim::new(u64::from(n - 1), Address::from_bytes([n; 20]).unwrap(), 10u32))
            .collect();
        let document = publish(1, claims, Metadata::default(), Utc::now()).unwrap();
        let path = dir.join("artifact.csv");
        fs::write(&path, to_text(&document).unwrap()).unwrap();
        (path, document.merkle_root().to_string())
    }

    #[test]
    fn test_run_accepts_matching_root() {
        let dir = tempfile::tempdir().unwrap();
        let (input, root) = write_artifact(dir.path());
        let args = Cli {
            input,
            root: Some(root),
        };
        assert!(run(&args, &DistributorConfig::default()).is_ok());
    }

    #[test]
    fn test_run_rejects_other_root() {
        let dir = tempfile::tempdir().unwrap();
        let (input, _) = write_artifact(dir.path());
        let args = Cli {
            input,
            root: Some(format!("0x{}", "ab".repeat(32))),
        };
        assert!(run(&args, &DistributorConfig::default()).is_err());
    }
}
