/// Audit record service.
///
/// Bridges the relational order store and the append-only ledger: computes
/// the canonical digest for a completed transaction, appends it under
/// `order:<id>`, and re-derives it later to detect silent tampering or
/// drift in the relational store. The ledger is never corrected in place;
/// inconsistency is resolved by re-running, not by mutating history.
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AuditError, Result};
use crate::ledger::AuditLedger;
use crate::state::models::TransactionRecord;
use crate::state::OrderStore;

/// Ledger key for an order's audit entry.
pub fn audit_key(order_id: i64) -> String {
    format!("order:{order_id}")
}

/// Key prefix for scanning all audit entries.
pub const AUDIT_KEY_PREFIX: &str = "order:";

/// Parse an order id back out of an audit key.
pub fn order_id_from_key(key: &str) -> Option<i64> {
    key.strip_prefix(AUDIT_KEY_PREFIX)?.parse().ok()
}

/// What a store call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new revision was appended.
    Stored { revision: u64 },
    /// The latest ledger revision already holds this digest; nothing written.
    AlreadyCurrent,
}

/// Result of a verification query. Returned as data, never thrown: a
/// mismatch must be diagnosable, with both hashes visible.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub order_id: i64,
    pub key: String,
    pub is_valid: bool,
    pub stored_digest: Option<String>,
    pub computed_digest: String,
}

/// Per-batch outcome counters for the sweep path.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct AuditRecordService {
    ledger: Arc<dyn AuditLedger>,
    orders: Arc<dyn OrderStore>,
}

impl AuditRecordService {
    pub fn new(ledger: Arc<dyn AuditLedger>, orders: Arc<dyn OrderStore>) -> Self {
        Self { ledger, orders }
    }

    pub fn ledger(&self) -> &Arc<dyn AuditLedger> {
        &self.ledger
    }

    /// Append the transaction's digest to the ledger.
    ///
    /// Idempotent at the business level: when the latest revision already
    /// equals the digest the write is skipped, so sweeper re-runs do not
    /// grow the revision history unboundedly. A ledger failure here is the
    /// caller's signal to retry later — it must not unwind order completion.
    pub async fn store_audit_record(&self, tx: &TransactionRecord) -> Result<StoreOutcome> {
        tx.validate()?;

        let key = audit_key(tx.order_id);
        let digest = tx.digest();

        if let Some(current) = self.ledger.get(&key).await? {
            if current.value == digest {
                return Ok(StoreOutcome::AlreadyCurrent);
            }
        }

        let revision = self.ledger.put(&key, &digest).await?;
        info!(order_id = tx.order_id, revision, "audit digest stored");
        Ok(StoreOutcome::Stored { revision })
    }

    /// Recompute the digest from the fields the relational store holds now
    /// and compare against the ledger. Read-only.
    ///
    /// Two independent checks must pass: the ledger's own verified read
    /// (inclusion/consistency proof for the entry) and digest equality
    /// against the recomputed value.
    pub async fn verify_integrity(
        &self,
        order_id: i64,
        tx: &TransactionRecord,
    ) -> Result<VerificationReport> {
        let key = audit_key(order_id);
        let computed_digest = tx.digest();
        let stored_digest = self.ledger.get(&key).await?.map(|rev| rev.value);

        let ledger_verified = if stored_digest.is_some() {
            self.ledger.verify(&key).await?
        } else {
            false
        };
        let is_valid =
            ledger_verified && stored_digest.as_deref() == Some(computed_digest.as_str());
        if !is_valid {
            warn!(
                order_id,
                ?stored_digest,
                computed_digest,
                "integrity verification failed"
            );
        }

        Ok(VerificationReport {
            order_id,
            key,
            is_valid,
            stored_digest,
            computed_digest,
        })
    }

    /// Verify an order by id, loading its current fields from the order
    /// store. Unknown or unpaid orders are `NotFound`.
    pub async fn verify_order(&self, order_id: i64) -> Result<VerificationReport> {
        let tx = self
            .orders
            .find_transaction(order_id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("completed order {order_id}")))?;
        self.verify_integrity(order_id, &tx).await
    }

    /// Scan every completed order and ensure its audit entry is current.
    /// One bad record never blocks the rest: failures are logged, counted,
    /// and left for the next sweep.
    pub async fn process_all_completed_orders(&self) -> Result<SweepReport> {
        let transactions = self.orders.completed_transactions().await?;
        let mut report = SweepReport {
            checked: transactions.len(),
            ..SweepReport::default()
        };

        for tx in &transactions {
            match self.store_audit_record(tx).await {
                Ok(StoreOutcome::Stored { .. }) => report.stored += 1,
                Ok(StoreOutcome::AlreadyCurrent) => report.skipped += 1,
                Err(e) => {
                    warn!(order_id = tx.order_id, error = %e, "audit sweep item failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed,
            "audit sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::state::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn service() -> (Arc<MemoryLedger>, Arc<MemoryStore>, AuditRecordService) {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let service = AuditRecordService::new(ledger.clone(), store.clone());
        (ledger, store, service)
    }

    fn tx(order_id: i64) -> TransactionRecord {
        TransactionRecord {
            order_id,
            buyer: Some("b1".into()),
            seller: Some("s1".into()),
            total_credits: 10,
            total_price: 30.0,
            paid_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_audit_key_roundtrip() {
        assert_eq!(audit_key(42), "order:42");
        assert_eq!(order_id_from_key("order:42"), Some(42));
        assert_eq!(order_id_from_key("anchor:1"), None);
    }

    #[tokio::test]
    async fn test_store_then_verify_roundtrip() {
        let (_, _, service) = service();
        let tx = tx(42);

        let outcome = service.store_audit_record(&tx).await.unwrap();
        assert!(matches!(outcome, StoreOutcome::Stored { revision: 1 }));

        let report = service.verify_integrity(42, &tx).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.stored_digest, Some(report.computed_digest.clone()));
    }

    #[tokio::test]
    async fn test_store_is_idempotent_without_revision_growth() {
        let (ledger, _, service) = service();
        let tx = tx(42);

        service.store_audit_record(&tx).await.unwrap();
        let second = service.store_audit_record(&tx).await.unwrap();
        assert_eq!(second, StoreOutcome::AlreadyCurrent);

        let history = ledger.history(&audit_key(42)).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_tampered_field_fails_verification_with_both_hashes() {
        let (_, _, service) = service();
        let stored = tx(42);
        service.store_audit_record(&stored).await.unwrap();

        let mut drifted = stored.clone();
        drifted.total_price = 31.0;
        let report = service.verify_integrity(42, &drifted).await.unwrap();

        assert!(!report.is_valid);
        let stored_digest = report.stored_digest.unwrap();
        assert_ne!(stored_digest, report.computed_digest);
        assert_eq!(stored_digest, stored.digest());
    }

    #[tokio::test]
    async fn test_missing_entry_is_invalid_not_error() {
        let (_, _, service) = service();
        let report = service.verify_integrity(404, &tx(404)).await.unwrap();
        assert!(!report.is_valid);
        assert!(report.stored_digest.is_none());
    }

    #[tokio::test]
    async fn test_invalid_fields_rejected_before_write() {
        let (ledger, _, service) = service();
        let mut bad = tx(1);
        bad.total_credits = -5;

        let err = service.store_audit_record(&bad).await.unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
        assert!(ledger.get(&audit_key(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_isolates_per_item_failures() {
        let (ledger, store, service) = service();
        let paid = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let id1 = store
            .insert_paid_order(101, Some("b"), None, 1, 10.0, paid)
            .await;
        let id2 = store
            .insert_paid_order(102, Some("b"), None, 2, 20.0, paid)
            .await;
        let id3 = store
            .insert_paid_order(103, Some("b"), None, 3, 30.0, paid)
            .await;
        store.insert_order(104, None, None, 4, 40.0).await; // unpaid, ignored

        ledger.poison(&audit_key(id2)).await;

        let report = service.process_all_completed_orders().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.stored, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);

        assert!(ledger.get(&audit_key(id1)).await.unwrap().is_some());
        assert!(ledger.get(&audit_key(id3)).await.unwrap().is_some());

        // Second sweep skips the healthy entries.
        let second = service.process_all_completed_orders().await.unwrap();
        assert_eq!(second.skipped, 2);
        assert_eq!(second.failed, 1);
    }
}
