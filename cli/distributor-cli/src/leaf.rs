//! Canonical leaf encoding.
//!
//! A leaf is `keccak256(abi.encodePacked(uint256 index, address account, uint256 amount))`,
//! the layout used by Solidity merkle distributors. Every field has a fixed
//! width, so a packed leaf can only be parsed one way.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::common::{keccak256, Address, LeafDigest, NodeHash, ADDRESS_LEN};
use crate::error::{DistributorError, Result};

/// Width of the index and amount words.
pub const WORD_LEN: usize = 32;

/// Largest amount bit length the verifier can accept.
pub const MAX_AMOUNT_BITS: u64 = 256;

/// Total packed length: two uint256 words around a 20-byte address.
pub const ENCODED_LEN: usize = WORD_LEN + ADDRESS_LEN + WORD_LEN;

/// One recipient's entitlement within a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub index: u64,
    pub account: Address,
    #[serde(with = "decimal")]
    pub amount: BigUint,
}

impl Claim {
    pub fn new(index: u64, account: Address, amount: impl Into<BigUint>) -> Self {
        Self {
            index,
            account,
            amount: amount.into(),
        }
    }
}

/// Packs a claim into its fixed-width byte form.
///
/// # Errors
/// Returns [`DistributorError::InvalidClaim`] if the amount does not fit in
/// 256 bits.
pub fn encode(claim: &Claim) -> Result<[u8; ENCODED_LEN]> {
    let amount_word = amount_to_word(&claim.amount)?;

    let mut packed = [0u8; ENCODED_LEN];
    packed[WORD_LEN - 8..WORD_LEN].copy_from_slice(&claim.index.to_be_bytes());
    packed[WORD_LEN..WORD_LEN + ADDRESS_LEN].copy_from_slice(claim.account.as_bytes());
    packed[WORD_LEN + ADDRESS_LEN..].copy_from_slice(&amount_word);
    Ok(packed)
}

/// Hashes the packed claim into its leaf digest.
pub fn digest(claim: &Claim) -> Result<LeafDigest> {
    Ok(NodeHash(keccak256(&encode(claim)?)))
}

/// Parses a decimal token amount.
///
/// Signs, fractions, and anything wider than 256 bits are rejected.
pub fn parse_amount(amount_str: &str) -> Result<BigUint> {
    let amount = parse_decimal(amount_str)?;
    check_amount(&amount)?;
    Ok(amount)
}

/// Parses a non-negative decimal integer of any size.
pub fn parse_decimal(value: &str) -> Result<BigUint> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DistributorError::InvalidClaim(format!(
            "amount '{trimmed}' is not a non-negative integer"
        )));
    }
    trimmed.parse::<BigUint>().map_err(|e| {
        DistributorError::InvalidClaim(format!("amount '{trimmed}' is not a number: {e}"))
    })
}

/// Fails unless `amount` fits the verifier's uint256 word.
pub fn check_amount(amount: &BigUint) -> Result<()> {
    amount_to_word(amount).map(|_| ())
}

fn amount_to_word(amount: &BigUint) -> Result<[u8; WORD_LEN]> {
    if amount.bits() > MAX_AMOUNT_BITS {
        return Err(DistributorError::InvalidClaim(format!(
            "amount {amount} exceeds {MAX_AMOUNT_BITS} bits"
        )));
    }
    let bytes = amount.to_bytes_be();
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

/// Serde adapter writing big integers as decimal strings, so JSON consumers
/// never see them squeezed through a float. Width is not checked here;
/// totals may exceed 256 bits.
pub mod decimal {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_decimal(&s).map_err(serde::de::Error::custom)
    }
}
