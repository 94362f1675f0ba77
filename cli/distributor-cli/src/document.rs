//! Distribution documents and the publication pipeline.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use crate::common::{Address, NodeHash};
use crate::error::{DistributorError, Result};
use crate::leaf::{self, decimal, Claim};
use crate::tree::{self, MerkleProof, MerkleTree};

/// Numeric distribution id, assigned once by the store.
pub type DistributionId = u64;

/// Descriptive fields carried alongside the commitment. Never hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub generated_at: Option<DateTime<Utc>>,
    pub source: String,
    pub excluded_accounts: Vec<Address>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One published claim plus its redemption overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    index: u64,
    account: Address,
    #[serde(with = "decimal")]
    amount: BigUint,
    proof: MerkleProof,
    claimed: bool,
    claimed_at: Option<DateTime<Utc>>,
}

impl ClaimRecord {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn amount(&self) -> &BigUint {
        &self.amount
    }

    pub fn proof(&self) -> &MerkleProof {
        &self.proof
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    pub fn claim(&self) -> Claim {
        Claim::new(self.index, self.account, self.amount.clone())
    }

    /// Marks the record redeemed. Returns false if it already was, leaving
    /// the first timestamp in place.
    pub(crate) fn mark_claimed(&mut self, at: DateTime<Utc>) -> bool {
        if self.claimed {
            return false;
        }
        self.claimed = true;
        self.claimed_at = Some(at);
        true
    }
}

/// Arguments the on-chain verifier needs to redeem one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPayload {
    pub distribution_id: DistributionId,
    pub merkle_root: NodeHash,
    pub index: u64,
    pub account: Address,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub proof: MerkleProof,
}

impl ClaimPayload {
    pub fn claim(&self) -> Claim {
        Claim::new(self.index, self.account, self.amount.clone())
    }
}

/// An immutable Merkle commitment over one round of claims.
///
/// Committed fields have no setters. The claimed flag on each record is the
/// only state that changes after publication, and only through
/// [`crate::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionDocument {
    id: DistributionId,
    merkle_root: NodeHash,
    #[serde(with = "decimal")]
    total_rewards: BigUint,
    claims: BTreeMap<Address, ClaimRecord>,
    metadata: Metadata,
    created_at: DateTime<Utc>,
}

impl DistributionDocument {
    pub fn id(&self) -> DistributionId {
        self.id
    }

    pub fn merkle_root(&self) -> NodeHash {
        self.merkle_root
    }

    pub fn total_rewards(&self) -> &BigUint {
        &self.total_rewards
    }

    pub fn claims(&self) -> &BTreeMap<Address, ClaimRecord> {
        &self.claims
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn get(&self, account: &Address) -> Option<&ClaimRecord> {
        self.claims.get(account)
    }

    pub(crate) fn get_mut(&mut self, account: &Address) -> Option<&mut ClaimRecord> {
        self.claims.get_mut(account)
    }

    /// Records sorted by claim index.
    pub fn records_by_index(&self) -> Vec<&ClaimRecord> {
        let mut records: Vec<&ClaimRecord> = self.claims.values().collect();
        records.sort_by_key(|record| record.index);
        records
    }

    /// Number of records whose redemption has been observed.
    pub fn claimed_count(&self) -> usize {
        self.claims.values().filter(|r| r.claimed).count()
    }

    /// Sum of amounts already redeemed.
    pub fn claimed_rewards(&self) -> BigUint {
        self.claims
            .values()
            .filter(|r| r.claimed)
            .map(|r| &r.amount)
            .sum()
    }

    /// Builds the verifier call arguments for `account`.
    pub fn claim_payload(&self, account: &Address) -> Result<ClaimPayload> {
        let record = self
            .claims
            .get(account)
            .ok_or_else(|| DistributorError::UnknownClaimant {
                distribution_id: self.id,
                account: account.to_string(),
            })?;
        Ok(ClaimPayload {
            distribution_id: self.id,
            merkle_root: self.merkle_root,
            index: record.index,
            account: record.account,
            amount: record.amount.clone(),
            proof: record.proof.clone(),
        })
    }

    /// Rebuilds the tree from the committed claims and returns its root.
    pub fn recompute_root(&self) -> Result<NodeHash> {
        let leaves = self
            .records_by_index()
            .into_iter()
            .map(|record| leaf::digest(&record.claim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(MerkleTree::build(leaves).root())
    }

    /// Checks every stored proof against the stored root.
    pub fn verify_proofs(&self) -> Result<bool> {
        for record in self.claims.values() {
            let leaf = leaf::digest(&record.claim())?;
            if !tree::verify(&record.proof, &leaf, &self.merkle_root) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Turns ordered `(account, amount)` entries into an indexed claim set.
///
/// Excluded accounts are dropped before indices are assigned, so indices
/// stay dense. A repeated account is rejected rather than merged.
pub fn assemble_claims(
    entries: impl IntoIterator<Item = (Address, BigUint)>,
    excluded: &BTreeSet<Address>,
) -> Result<Vec<Claim>> {
    let mut seen = HashSet::new();
    let mut claims = Vec::new();

    for (account, amount) in entries {
        if !seen.insert(account) {
            return Err(DistributorError::DuplicateAccount(account.to_string()));
        }
        if excluded.contains(&account) {
            debug!(%account, "skipping excluded account");
            continue;
        }
        claims.push(Claim::new(claims.len() as u64, account, amount));
    }

    Ok(claims)
}

/// Validates `claims` and builds the published document.
///
/// All-or-nothing: any invalid claim aborts before a document exists.
pub fn publish(
    id: DistributionId,
    claims: Vec<Claim>,
    metadata: Metadata,
    created_at: DateTime<Utc>,
) -> Result<DistributionDocument> {
    let claims = validate_claims(claims)?;

    let leaves = claims
        .iter()
        .map(leaf::digest)
        .collect::<Result<Vec<_>>>()?;
    let tree = MerkleTree::build(leaves);
    let proofs = tree.proofs()?;
    let merkle_root = tree.root();

    let total_rewards: BigUint = claims.iter().map(|claim| &claim.amount).sum();

    let records = claims
        .into_iter()
        .zip(proofs)
        .map(|(claim, proof)| {
            let record = ClaimRecord {
                index: claim.index,
                account: claim.account,
                amount: claim.amount,
                proof,
                claimed: false,
                claimed_at: None,
            };
            (record.account, record)
        })
        .collect::<BTreeMap<_, _>>();

    info!(
        distribution_id = id,
        claims = records.len(),
        depth = tree.depth(),
        root = %merkle_root,
        total = %total_rewards,
        "published distribution"
    );

    Ok(DistributionDocument {
        id,
        merkle_root,
        total_rewards,
        claims: records,
        metadata,
        created_at,
    })
}

/// Checks index uniqueness and density, account uniqueness, and amount width.
/// Returns the claims sorted by index.
fn validate_claims(mut claims: Vec<Claim>) -> Result<Vec<Claim>> {
    let mut indices = HashSet::with_capacity(claims.len());
    let mut accounts = HashSet::with_capacity(claims.len());

    for claim in &claims {
        if !indices.insert(claim.index) {
            return Err(DistributorError::DuplicateIndex(claim.index));
        }
        if !accounts.insert(claim.account) {
            return Err(DistributorError::DuplicateAccount(claim.account.to_string()));
        }
        leaf::encode(claim)?;
    }

    claims.sort_by_key(|claim| claim.index);
    if let Some((position, claim)) = claims
        .iter()
        .enumerate()
        .find(|(position, claim)| claim.index != *position as u64)
    {
        return Err(DistributorError::InvalidClaim(format!(
            "claim indices must be contiguous from 0: expected {position}, found {}",
            claim.index
        )));
    }

    Ok(claims)
}

/// Rebuilds a document from already-validated parts. Used by the codecs.
pub(crate) fn from_parts(
    id: DistributionId,
    merkle_root: NodeHash,
    total_rewards: BigUint,
    claims: BTreeMap<Address, ClaimRecord>,
    metadata: Metadata,
    created_at: DateTime<Utc>,
) -> DistributionDocument {
    DistributionDocument {
        id,
        merkle_root,
        total_rewards,
        claims,
        metadata,
        created_at,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::parse_address;
    use chrono::TimeZone;

    pub(crate) fn account(n: u32) -> Address {
        let mut bytes = [0x5a; 20];
        bytes[16..].copy_from_slice(&n.to_be_bytes());
        Address::from_bytes(bytes).unwrap()
    }

    pub(crate) fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn sample_document(id: DistributionId, count: u32) -> DistributionDocument {
        let claims = (0..count)
            .map(|i| Claim::new(u64::from(i), account(i), 1_000u32 + i * 7))
            .collect();
        publish(id, claims, Metadata::default(), fixed_time()).unwrap()
    }

    fn scenario_claims() -> Vec<Claim> {
        vec![
            Claim::new(
                0,
                parse_address("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01").unwrap(),
                100u32,
            ),
            Claim::new(
                1,
                parse_address("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb02").unwrap(),
                250u32,
            ),
        ]
    }

    #[test]
    fn test_publish_two_claims() {
        let doc = publish(7, scenario_claims(), Metadata::default(), fixed_time()).unwrap();

        assert_eq!(doc.id(), 7);
        assert_eq!(doc.total_rewards(), &BigUint::from(350u32));
        assert_eq!(doc.claim_count(), 2);
        assert!(doc.verify_proofs().unwrap());

        for record in doc.claims().values() {
            let leaf = leaf::digest(&record.claim()).unwrap();
            assert!(tree::verify(record.proof(), &leaf, &doc.merkle_root()));

            let mut corrupted = record.proof().clone();
            corrupted.0[0].0[0] ^= 0x80;
            assert!(!tree::verify(&corrupted, &leaf, &doc.merkle_root()));
        }
    }

    #[test]
    fn test_publish_accepts_unordered_input() {
        let mut claims = scenario_claims();
        claims.reverse();
        let reversed = publish(1, claims, Metadata::default(), fixed_time()).unwrap();
        let ordered = publish(1, scenario_claims(), Metadata::default(), fixed_time()).unwrap();
        assert_eq!(reversed, ordered);
    }

    #[test]
    fn test_publish_rejects_duplicate_index() {
        let mut claims = scenario_claims();
        claims[1].index = 0;
        let err = publish(1, claims, Metadata::default(), fixed_time()).unwrap_err();
        assert!(matches!(err, DistributorError::DuplicateIndex(0)));
    }

    #[test]
    fn test_publish_rejects_duplicate_account() {
        let mut claims = scenario_claims();
        claims[1].account = claims[0].account;
        let err = publish(1, claims, Metadata::default(), fixed_time()).unwrap_err();
        assert!(matches!(err, DistributorError::DuplicateAccount(_)));
    }

    #[test]
    fn test_publish_rejects_index_gap() {
        let mut claims = scenario_claims();
        claims[1].index = 2;
        let err = publish(1, claims, Metadata::default(), fixed_time()).unwrap_err();
        assert!(matches!(err, DistributorError::InvalidClaim(_)));
    }

    #[test]
    fn test_publish_rejects_oversized_amount() {
        let mut claims = scenario_claims();
        claims[0].amount = BigUint::from(1u8) << 300usize;
        let err = publish(1, claims, Metadata::default(), fixed_time()).unwrap_err();
        assert!(matches!(err, DistributorError::InvalidClaim(_)));
    }

    #[test]
    fn test_total_rewards_exceeds_u256() {
        let max = (BigUint::from(1u8) << 256usize) - 1u8;
        let claims = vec![
            Claim::new(0, account(1), max.clone()),
            Claim::new(1, account(2), max.clone()),
        ];
        let doc = publish(1, claims, Metadata::default(), fixed_time()).unwrap();
        assert_eq!(doc.total_rewards(), &(max * 2u8));
        assert!(doc.total_rewards().bits() > 256);
    }

    #[test]
    fn test_publish_empty_claim_set() {
        let doc = publish(1, Vec::new(), Metadata::default(), fixed_time()).unwrap();
        assert_eq!(doc.merkle_root(), NodeHash::ZERO);
        assert_eq!(doc.total_rewards(), &BigUint::from(0u8));
        assert_eq!(doc.recompute_root().unwrap(), NodeHash::ZERO);
    }

    #[test]
    fn test_single_claim_root_is_leaf() {
        let claim = Claim::new(0, account(9), 42u32);
        let leaf = leaf::digest(&claim).unwrap();
        let doc = publish(1, vec![claim], Metadata::default(), fixed_time()).unwrap();
        assert_eq!(doc.merkle_root(), leaf);
        assert!(doc.get(&account(9)).unwrap().proof().is_empty());
    }

    #[test]
    fn test_every_field_change_changes_root() {
        let base = publish(1, scenario_claims(), Metadata::default(), fixed_time())
            .unwrap()
            .merkle_root();

        let mut claims = scenario_claims();
        claims.swap(0, 1);
        claims[0].index = 0;
        claims[1].index = 1;
        let swapped = publish(1, claims, Metadata::default(), fixed_time()).unwrap();
        assert_ne!(swapped.merkle_root(), base);

        let mut claims = scenario_claims();
        claims[1].account = account(77);
        let moved = publish(1, claims, Metadata::default(), fixed_time()).unwrap();
        assert_ne!(moved.merkle_root(), base);

        let mut claims = scenario_claims();
        claims[0].amount += 1u8;
        let bumped = publish(1, claims, Metadata::default(), fixed_time()).unwrap();
        assert_ne!(bumped.merkle_root(), base);
    }

    #[test]
    fn test_proofs_verify_for_odd_and_even_counts() {
        for count in [1, 2, 3, 4, 25] {
            let doc = sample_document(1, count);
            assert!(doc.verify_proofs().unwrap(), "count {count}");
            assert_eq!(doc.recompute_root().unwrap(), doc.merkle_root());
        }
    }

    #[test]
    fn test_assemble_claims_skips_excluded() {
        let excluded: BTreeSet<Address> = [account(2)].into_iter().collect();
        let entries = (1..=4).map(|i| (account(i), BigUint::from(i * 10)));
        let claims = assemble_claims(entries, &excluded).unwrap();

        let accounts: Vec<Address> = claims.iter().map(|c| c.account).collect();
        assert_eq!(accounts, vec![account(1), account(3), account(4)]);
        let indices: Vec<u64> = claims.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_assemble_claims_rejects_repeated_account() {
        let entries = vec![
            (account(1), BigUint::from(1u8)),
            (account(1), BigUint::from(2u8)),
        ];
        let err = assemble_claims(entries, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, DistributorError::DuplicateAccount(_)));
    }

    #[test]
    fn test_claim_payload() {
        let doc = sample_document(3, 5);
        let payload = doc.claim_payload(&account(4)).unwrap();
        assert_eq!(payload.index, 4);
        assert_eq!(payload.merkle_root, doc.merkle_root());
        assert_eq!(payload.amount, BigUint::from(1_028u32));

        let err = doc.claim_payload(&account(99)).unwrap_err();
        assert!(matches!(err, DistributorError::UnknownClaimant { .. }));
    }
}
