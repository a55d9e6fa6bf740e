/// SHA-256 Merkle tree with the duplicate-last odd-node policy.
///
/// Leaves are the 32-byte transaction digests themselves; internal nodes
/// are SHA256(left || right). When the node count at any level is odd, the
/// last node is paired with itself. A single-leaf tree has a root equal to
/// that leaf — no degenerate pair is hashed. Both conventions are
/// load-bearing for proof verification and are pinned by tests.
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};

/// Hash two child nodes to produce a parent.
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// A Merkle tree over pre-computed leaf digests.
pub struct MerkleTree {
    /// All levels of the tree. levels[0] = leaves, levels[last] = [root].
    pub(crate) levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a tree from leaf digests. An empty batch is rejected.
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(AuditError::EmptyBatch);
        }

        let mut levels = vec![leaves];

        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for pair in current.chunks(2) {
                let left = &pair[0];
                // Odd node: pair the last node with itself
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(node_hash(left, right));
            }

            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// The Merkle root. A tree is never empty, so this always exists.
    pub fn root(&self) -> [u8; 32] {
        self.levels.last().unwrap()[0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// The leaf digests.
    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.levels[0]
    }
}
