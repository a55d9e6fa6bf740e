/// Merkle batch construction for audit anchoring.
///
/// A batch covers the audited orders that have not yet been anchored.
/// Construction is pure and deterministic: entries are sorted by order id,
/// the hex digests become the 32-byte leaves, and every leaf gets an
/// inclusion proof against the batch root. Only the root and membership
/// are persisted — the batch itself is transient.
pub mod proof;
pub mod tree;

use crate::digest::decode_digest;
use crate::error::{AuditError, Result};

pub use proof::{verify_proof, MerkleProof, Position};
pub use tree::{node_hash, MerkleTree};

/// A transient anchoring unit: ordered membership, leaves, root, proofs.
#[derive(Debug)]
pub struct MerkleBatch {
    /// Order ids in leaf order (ascending).
    pub order_ids: Vec<i64>,
    /// Leaf digests, index-aligned with `order_ids`.
    pub leaves: Vec<[u8; 32]>,
    /// Root over all leaves.
    pub root: [u8; 32],
    /// Per-leaf inclusion proofs, index-aligned with `order_ids`.
    pub proofs: Vec<MerkleProof>,
}

impl MerkleBatch {
    /// Build a batch from (order_id, digest_hex) pairs.
    ///
    /// Fails with `EmptyBatch` for an empty input and `Validation` for a
    /// digest that is not 64 lowercase hex characters.
    pub fn build(entries: &[(i64, String)]) -> Result<Self> {
        if entries.is_empty() {
            return Err(AuditError::EmptyBatch);
        }

        let mut sorted: Vec<&(i64, String)> = entries.iter().collect();
        sorted.sort_by_key(|(order_id, _)| *order_id);

        let mut order_ids = Vec::with_capacity(sorted.len());
        let mut leaves = Vec::with_capacity(sorted.len());
        for (order_id, digest_hex) in sorted {
            let leaf = decode_digest(digest_hex).ok_or_else(|| {
                AuditError::Validation(format!(
                    "order {order_id} has a malformed digest: {digest_hex:?}"
                ))
            })?;
            order_ids.push(*order_id);
            leaves.push(leaf);
        }

        let tree = MerkleTree::from_leaves(leaves.clone())?;
        let root = tree.root();
        let proofs = (0..leaves.len())
            .map(|i| tree.prove(i).expect("index within leaf count"))
            .collect();

        Ok(Self {
            order_ids,
            leaves,
            root,
            proofs,
        })
    }

    /// Root as lowercase hex, the persisted/anchored form.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    pub fn len(&self) -> usize {
        self.order_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::transaction_digest;

    fn entry(order_id: i64) -> (i64, String) {
        let digest = transaction_digest(
            order_id,
            Some("b1"),
            Some("s1"),
            10,
            30.0,
            1_700_000_000_000,
        );
        (order_id, digest)
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            MerkleBatch::build(&[]),
            Err(AuditError::EmptyBatch)
        ));
    }

    #[test]
    fn test_malformed_digest_rejected() {
        let err = MerkleBatch::build(&[(1, "nothex".into())]).unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
    }

    #[test]
    fn test_entries_sorted_by_order_id() {
        let batch = MerkleBatch::build(&[entry(30), entry(10), entry(20)]).unwrap();
        assert_eq!(batch.order_ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_three_order_batch_proofs_verify() {
        let batch = MerkleBatch::build(&[entry(1), entry(2), entry(3)]).unwrap();
        assert_eq!(batch.len(), 3);
        for proof in &batch.proofs {
            assert!(verify_proof(&batch.root, proof));
        }
    }

    #[test]
    fn test_single_order_root_equals_digest() {
        let (order_id, digest) = entry(42);
        let batch = MerkleBatch::build(&[(order_id, digest.clone())]).unwrap();
        assert_eq!(batch.root_hex(), digest);
    }

    #[test]
    fn test_input_order_does_not_change_root() {
        let a = MerkleBatch::build(&[entry(1), entry(2), entry(3)]).unwrap();
        let b = MerkleBatch::build(&[entry(3), entry(1), entry(2)]).unwrap();
        assert_eq!(a.root, b.root);
    }
}
