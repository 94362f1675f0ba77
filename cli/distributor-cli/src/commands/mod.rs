use anyhow::{Context, Result};
use std::path::PathBuf;

use distributor_cli::{DistributorConfig, FileStore};

pub mod claim;
pub mod export;
pub mod publish;
pub mod redeem;
pub mod verify;

/// Opens the file store named on the command line, falling back to the
/// configured directory.
pub fn open_store(dir: Option<&PathBuf>, config: &DistributorConfig) -> Result<FileStore> {
    let dir = dir.unwrap_or(&config.store.dir);
    FileStore::open(dir).with_context(|| format!("Failed to open store at {}", dir.display()))
}
