/// Merkle inclusion proof generation and verification.
use serde::{Deserialize, Serialize};

use super::tree::{node_hash, MerkleTree};

/// Position of a sibling relative to the node being proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Left,
    Right,
}

/// An inclusion proof for a single leaf.
///
/// With the duplicate-last policy every level below the root contributes
/// exactly one sibling step; an odd trailing node's sibling is itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf_hash: [u8; 32],
    pub siblings: Vec<(Position, [u8; 32])>,
}

impl MerkleTree {
    /// Generate an inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            if sibling_idx < level.len() {
                let position = if idx % 2 == 0 {
                    Position::Right
                } else {
                    Position::Left
                };
                siblings.push((position, level[sibling_idx]));
            } else {
                // Duplicated trailing node: its sibling is itself.
                siblings.push((Position::Right, level[idx]));
            }

            idx /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf_hash: self.leaves()[index],
            siblings,
        })
    }
}

/// Verify an inclusion proof against a known root.
pub fn verify_proof(root: &[u8; 32], proof: &MerkleProof) -> bool {
    let mut current = proof.leaf_hash;

    for (position, sibling) in &proof.siblings {
        current = match position {
            Position::Left => node_hash(sibling, &current),
            Position::Right => node_hash(&current, sibling),
        };
    }

    &current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<[u8; 32]> {
        (0..n).map(|i| [i; 32]).collect()
    }

    #[test]
    fn test_proof_single_leaf_is_empty() {
        let tree = MerkleTree::from_leaves(leaves(1)).unwrap();
        let proof = tree.prove(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(verify_proof(&tree.root(), &proof));
    }

    #[test]
    fn test_all_proofs_verify_for_sizes_1_through_8() {
        for n in 1..=8u8 {
            let tree = MerkleTree::from_leaves(leaves(n)).unwrap();
            let root = tree.root();
            for i in 0..n as usize {
                let proof = tree.prove(i).unwrap();
                assert!(
                    verify_proof(&root, &proof),
                    "proof failed for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn test_duplicated_node_proof_has_self_sibling() {
        let tree = MerkleTree::from_leaves(leaves(3)).unwrap();
        let proof = tree.prove(2).unwrap();
        // First step pairs the trailing leaf with itself.
        assert_eq!(proof.siblings[0], (Position::Right, [2u8; 32]));
        assert!(verify_proof(&tree.root(), &proof));
    }

    #[test]
    fn test_tampered_leaf_fails() {
        let tree = MerkleTree::from_leaves(leaves(5)).unwrap();
        let root = tree.root();
        for i in 0..5 {
            let mut proof = tree.prove(i).unwrap();
            proof.leaf_hash[0] ^= 0x01;
            assert!(!verify_proof(&root, &proof), "tampered leaf {i} verified");
        }
    }

    #[test]
    fn test_wrong_root_fails() {
        let tree = MerkleTree::from_leaves(leaves(4)).unwrap();
        let proof = tree.prove(0).unwrap();
        assert!(!verify_proof(&[0xFF; 32], &proof));
    }

    #[test]
    fn test_out_of_bounds() {
        let tree = MerkleTree::from_leaves(leaves(2)).unwrap();
        assert!(tree.prove(2).is_none());
    }
}
