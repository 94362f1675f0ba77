//! Binary Merkle tree with sorted-pair hashing.
//!
//! Parent nodes are `keccak256(min(a, b) || max(a, b))`, the convention of
//! OpenZeppelin's `MerkleProof.verify`. An unpaired node at the end of a level
//! is carried up unchanged. Build and verify must agree on both rules, and
//! both must agree with the on-chain verifier named by [`HASH_SCHEME`].

use serde::{Deserialize, Serialize};

use crate::common::{keccak256_hash, LeafDigest, NodeHash};
use crate::error::{DistributorError, Result};

/// Versioned name of the leaf encoding, pair hashing, and odd-node policy.
/// Written into every interchange artifact and checked on import.
pub const HASH_SCHEME: &str = "keccak256-packed-sorted-pair/v1";

/// Sibling path from a leaf up to the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerkleProof(pub Vec<NodeHash>);

impl MerkleProof {
    pub fn siblings(&self) -> &[NodeHash] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Hashes two children in byte order, so position in the tree never matters.
pub fn hash_pair(a: &NodeHash, b: &NodeHash) -> NodeHash {
    if a <= b {
        NodeHash(keccak256_hash(a.0, b.0))
    } else {
        NodeHash(keccak256_hash(b.0, a.0))
    }
}

/// All levels of a built tree. `levels[0]` holds the leaves in index order
/// and the last level holds exactly the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<NodeHash>>,
}

impl MerkleTree {
    /// Builds the tree over `leaves`, in caller order.
    ///
    /// An empty leaf set yields an empty tree whose root is all zeroes.
    pub fn build(leaves: Vec<LeafDigest>) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels: Vec<Vec<NodeHash>> = vec![leaves];

        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next_level: Vec<NodeHash> = level
                .chunks(2)
                .map(|chunk| match chunk {
                    [left, right] => hash_pair(left, right),
                    [odd] => *odd,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next_level);
        }

        Self { levels }
    }

    pub fn root(&self) -> NodeHash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(NodeHash::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn levels(&self) -> &[Vec<NodeHash>] {
        &self.levels
    }

    /// Generates the inclusion proof for the leaf at `leaf_index`.
    ///
    /// Levels where the ancestor was carried up contribute no sibling.
    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.leaf_count() {
            return Err(DistributorError::InvalidClaim(format!(
                "leaf index {} is out of bounds for tree with {} leaves",
                leaf_index,
                self.leaf_count()
            )));
        }

        let mut proof = Vec::with_capacity(self.depth());
        let mut current_index = leaf_index;

        for level in &self.levels[..self.depth()] {
            let sibling_index = current_index ^ 1;
            if let Some(sibling) = level.get(sibling_index) {
                proof.push(*sibling);
            }
            current_index /= 2;
        }

        Ok(MerkleProof(proof))
    }

    /// Proofs for every leaf, in leaf order.
    pub fn proofs(&self) -> Result<Vec<MerkleProof>> {
        (0..self.leaf_count()).map(|i| self.proof(i)).collect()
    }
}

/// Computes the root a proof commits `leaf` to.
pub fn fold_proof(proof: &MerkleProof, leaf: &LeafDigest) -> NodeHash {
    proof
        .siblings()
        .iter()
        .fold(*leaf, |node, sibling| hash_pair(&node, sibling))
}

/// Returns whether `proof` connects `leaf` to `root`.
///
/// The zero root belongs to the empty tree and never verifies.
pub fn verify(proof: &MerkleProof, leaf: &LeafDigest, root: &NodeHash) -> bool {
    *root != NodeHash::ZERO && fold_proof(proof, leaf) == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(count: usize) -> Vec<LeafDigest> {
        (0..count)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                NodeHash(crate::common::keccak256(&bytes))
            })
            .collect()
    }

    fn assert_all_proofs_verify(count: usize) {
        let tree = MerkleTree::build(leaves(count));
        let root = tree.root();
        for (i, leaf) in leaves(count).iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(verify(&proof, leaf, &root), "leaf {i} of {count} failed");
        }
    }

    #[test]
    fn test_hash_pair_is_order_independent() {
        let [a, b] = [NodeHash([1u8; 32]), NodeHash([2u8; 32])];
        assert_eq!(hash_pair(&a, &b), hash_pair(&b, &a));
        assert_eq!(hash_pair(&a, &b).0, keccak256_hash(a.0, b.0));
    }

    #[test]
    fn test_single_leaf_tree() {
        let leaf = leaves(1)[0];
        let tree = MerkleTree::build(vec![leaf]);
        assert_eq!(tree.root(), leaf);
        let proof = tree.proof(0).unwrap();
        assert!(proof.is_empty());
        assert!(verify(&proof, &leaf, &tree.root()));
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::build(Vec::new());
        assert_eq!(tree.root(), NodeHash::ZERO);
        assert_eq!(tree.leaf_count(), 0);
        assert!(tree.proof(0).is_err());
        assert!(!verify(&MerkleProof::default(), &NodeHash::ZERO, &tree.root()));
    }

    #[test]
    fn test_two_leaf_root() {
        let l = leaves(2);
        let tree = MerkleTree::build(l.clone());
        assert_eq!(tree.root(), hash_pair(&l[0], &l[1]));
        assert_eq!(tree.proof(0).unwrap().siblings(), &[l[1]]);
        assert_eq!(tree.proof(1).unwrap().siblings(), &[l[0]]);
    }

    #[test]
    fn test_odd_node_is_carried_up() {
        let l = leaves(3);
        let tree = MerkleTree::build(l.clone());
        let expected = hash_pair(&hash_pair(&l[0], &l[1]), &l[2]);
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.levels()[1], vec![hash_pair(&l[0], &l[1]), l[2]]);

        // Leaf 2 has no sibling at level 0.
        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.siblings(), &[hash_pair(&l[0], &l[1])]);
    }

    #[test]
    fn test_proofs_verify_for_small_counts() {
        for count in [1, 2, 3, 4, 5, 7, 8, 25] {
            assert_all_proofs_verify(count);
        }
    }

    #[test]
    fn test_depth() {
        assert_eq!(MerkleTree::build(leaves(1)).depth(), 0);
        assert_eq!(MerkleTree::build(leaves(2)).depth(), 1);
        assert_eq!(MerkleTree::build(leaves(4)).depth(), 2);
        assert_eq!(MerkleTree::build(leaves(25)).depth(), 5);
    }

    #[test]
    fn test_corrupted_proof_fails() {
        let l = leaves(4);
        let tree = MerkleTree::build(l.clone());
        let mut proof = tree.proof(1).unwrap();
        proof.0[0].0[7] ^= 0x01;
        assert!(!verify(&proof, &l[1], &tree.root()));
    }

    #[test]
    fn test_proof_for_wrong_leaf_fails() {
        let l = leaves(4);
        let tree = MerkleTree::build(l.clone());
        let proof = tree.proof(0).unwrap();
        assert!(!verify(&proof, &l[2], &tree.root()));
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let tree = MerkleTree::build(leaves(2));
        assert!(matches!(
            tree.proof(5),
            Err(DistributorError::InvalidClaim(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_every_leaf_verifies(count in 1usize..200) {
            let l = leaves(count);
            let tree = MerkleTree::build(l.clone());
            let root = tree.root();
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                prop_assert!(verify(&proof, leaf, &root));
            }
        }

        #[test]
        fn prop_changing_a_leaf_changes_root(count in 1usize..64, pick in 0usize..64) {
            let mut l = leaves(count);
            let before = MerkleTree::build(l.clone()).root();
            let i = pick % count;
            l[i].0[0] ^= 0xff;
            prop_assert_ne!(MerkleTree::build(l).root(), before);
        }
    }
}
