use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::error::{DistributorError, Result};

/// Length in bytes of an account address.
pub const ADDRESS_LEN: usize = 20;

/// Length in bytes of every tree node, leaf or interior.
pub const HASH_LEN: usize = 32;

/// A 20-byte chain address.
///
/// Addresses are normalized on parse, so two spellings of the same account
/// (prefix, letter case, whitespace) compare equal and render identically as
/// `0x` followed by 40 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Result<Self> {
        if bytes == [0u8; ADDRESS_LEN] {
            return Err(DistributorError::InvalidClaim(
                "zero address not allowed".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

/// Parses an address from a hex string.
///
/// # Arguments
/// * `addr_str` - The address string, with or without "0x" prefix
///
/// # Errors
/// Returns [`DistributorError::InvalidClaim`] if the address is not 40 hex
/// characters, contains invalid hex, or is the zero address.
pub fn parse_address(addr_str: &str) -> Result<Address> {
    let trimmed = addr_str.trim();
    let cleaned = strip_hex_prefix(trimmed);
    if cleaned.len() != ADDRESS_LEN * 2 {
        return Err(DistributorError::InvalidClaim(format!(
            "invalid address length: expected 40 hex chars, got {}",
            cleaned.len()
        )));
    }
    let mut address = [0u8; ADDRESS_LEN];
    hex::decode_to_slice(cleaned, &mut address).map_err(|e| {
        DistributorError::InvalidClaim(format!("invalid address hex '{trimmed}': {e}"))
    })?;
    Address::from_bytes(address)
}

impl FromStr for Address {
    type Err = DistributorError;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte Keccak256 output: a leaf digest, an interior node, or a root.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHash(pub [u8; HASH_LEN]);

/// Digest of one encoded claim.
pub type LeafDigest = NodeHash;

impl NodeHash {
    pub const ZERO: NodeHash = NodeHash([0u8; HASH_LEN]);

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

/// Parses a 32-byte digest from hex, with or without "0x" prefix.
pub fn parse_hash(hash_str: &str) -> Result<NodeHash> {
    let cleaned = strip_hex_prefix(hash_str.trim());
    if cleaned.len() != HASH_LEN * 2 {
        return Err(DistributorError::InvalidDigest(format!(
            "expected 64 hex chars, got {}",
            cleaned.len()
        )));
    }
    let mut hash = [0u8; HASH_LEN];
    hex::decode_to_slice(cleaned, &mut hash)
        .map_err(|e| DistributorError::InvalidDigest(e.to_string()))?;
    Ok(NodeHash(hash))
}

impl FromStr for NodeHash {
    type Err = DistributorError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hash(s)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(self.0))
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({self})")
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Keccak256 of an arbitrary byte string.
pub fn keccak256(bytes: &[u8]) -> [u8; HASH_LEN] {
    Keccak256::digest(bytes).into()
}

/// Computes a Keccak256 hash of two 32-byte values concatenated.
///
/// Order is preserved; callers that need the sorted-pair convention sort
/// first (see [`crate::tree::hash_pair`]).
pub fn keccak256_hash(left: [u8; HASH_LEN], right: [u8; HASH_LEN]) -> [u8; HASH_LEN] {
    let hash = Keccak256::new()
        .chain_update(left)
        .chain_update(right)
        .finalize();
    hash.into()
}

/// Lowercase hex with a "0x" prefix.
pub fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Writes `contents` to a sibling temp file and renames it over `path`, so
/// readers never observe a half-written artifact.
pub fn write_file_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
