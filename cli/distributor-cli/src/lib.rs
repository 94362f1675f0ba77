#![forbid(unsafe_code)]

pub mod codec;
pub mod common;
pub mod config;
pub mod document;
pub mod error;
pub mod leaf;
pub mod reconcile;
pub mod store;
pub mod tree;

pub use codec::{from_json, from_text, from_text_verified, to_json, to_text, verify_integrity};
pub use common::{
    hex_encode, keccak256, keccak256_hash, parse_address, parse_hash, write_file_atomic, Address,
    LeafDigest, NodeHash,
};
pub use config::DistributorConfig;
pub use document::{
    assemble_claims, publish, ClaimPayload, ClaimRecord, DistributionDocument, DistributionId,
    Metadata,
};
pub use error::{DistributorError, Result};
pub use leaf::{digest, encode, parse_amount, Claim};
pub use reconcile::{
    apply_event, apply_redemption, ensure_root, reconcile_events, verify_root, ReconcileReport,
    RedemptionEvent, RedemptionOutcome,
};
pub use store::{publish_new, with_retries, DistributionStore, FileStore, MemoryStore};
pub use tree::{hash_pair, verify, MerkleProof, MerkleTree, HASH_SCHEME};
