//! Operator configuration, read from TOML.
//!
//! ```toml
//! [publish]
//! source = "staking rewards, epoch 41"
//! excluded_accounts = ["0x1111111111111111111111111111111111111111"]
//!
//! [store]
//! dir = "distributions"
//! ```

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::common::Address;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistributorConfig {
    pub publish: PublishConfig,
    pub store: StoreConfig,
}

/// Inputs to the publication pipeline that are not claims.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Description recorded in document metadata.
    pub source: Option<String>,
    /// Accounts dropped before indices are assigned, e.g. protocol-owned wallets.
    pub excluded_accounts: BTreeSet<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("distributions"),
        }
    }
}

impl DistributorConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Loads `path` if given, otherwise returns defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
