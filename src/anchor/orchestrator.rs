/// Anchoring cycle orchestrator.
///
/// One cycle walks COLLECTING → BUILDING → PUBLISHING → CONFIRMING →
/// RECORDED; any failure drops the cycle into FAILED. No candidate order is
/// mutated before RECORDED, so a failed cycle restarts cleanly at
/// COLLECTING with the same candidate set.
///
/// Anchoring is serialized globally: a second trigger while a cycle runs is
/// rejected with `CycleInProgress`, never run concurrently — two
/// overlapping cycles could otherwise claim the same order ids.
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use super::{ChainPublisher, RootMetadata};
use crate::audit::{order_id_from_key, AUDIT_KEY_PREFIX};
use crate::error::{AuditError, Result};
use crate::ledger::AuditLedger;
use crate::merkle::MerkleBatch;
use crate::notify::AnchorNotifier;
use crate::state::models::AnchorRecord;
use crate::state::AnchorStore;

/// Most audit entries a single cycle will consider.
const SCAN_LIMIT: usize = 2500;

/// Result of one anchoring cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Every audited order is already anchored; a no-op, not an error.
    NoCandidates,
    Anchored(AnchorRecord),
}

pub struct AnchorOrchestrator {
    ledger: Arc<dyn AuditLedger>,
    anchors: Arc<dyn AnchorStore>,
    publisher: Arc<dyn ChainPublisher>,
    notifier: Arc<dyn AnchorNotifier>,
    /// Global serialization gate; try-locked, never awaited.
    gate: tokio::sync::Mutex<()>,
}

impl AnchorOrchestrator {
    pub fn new(
        ledger: Arc<dyn AuditLedger>,
        anchors: Arc<dyn AnchorStore>,
        publisher: Arc<dyn ChainPublisher>,
        notifier: Arc<dyn AnchorNotifier>,
    ) -> Self {
        Self {
            ledger,
            anchors,
            publisher,
            notifier,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one anchoring cycle. Rejects overlapping triggers.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let _guard = self
            .gate
            .try_lock()
            .map_err(|_| AuditError::CycleInProgress)?;

        let cycle_id = Uuid::now_v7();
        match self.run_cycle_inner(cycle_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(%cycle_id, error = %e, retryable = e.is_retryable(), "anchoring cycle failed");
                Err(e)
            }
        }
    }

    async fn run_cycle_inner(&self, cycle_id: Uuid) -> Result<CycleOutcome> {
        info!(%cycle_id, phase = "collecting", "anchoring cycle started");
        let candidates = self.collect_candidates().await?;
        if candidates.is_empty() {
            info!(%cycle_id, "no unanchored audit entries");
            return Ok(CycleOutcome::NoCandidates);
        }

        info!(%cycle_id, phase = "building", candidates = candidates.len(), "building merkle batch");
        let batch = MerkleBatch::build(&candidates)?;
        let metadata = RootMetadata {
            batch_size: batch.len() as u64,
            first_order_id: batch.order_ids[0],
            last_order_id: *batch.order_ids.last().expect("non-empty batch"),
        };

        info!(%cycle_id, phase = "publishing", root = %batch.root_hex(), "publishing root");
        // publish_root blocks through CONFIRMING; a bounded wait inside the
        // publisher turns a stuck transaction into a retryable failure.
        let receipt = self.publisher.publish_root(&batch.root, &metadata).await?;

        info!(%cycle_id, phase = "recording", tx_hash = %receipt.tx_hash, "recording anchor");
        let record = self
            .anchors
            .record_anchor(
                &batch.root_hex(),
                &receipt.tx_hash,
                receipt.block_number as i64,
                &batch.order_ids,
                Utc::now(),
            )
            .await?;

        if let Err(e) = self
            .notifier
            .anchor_confirmed(record.id, &record.order_ids, record.order_ids.len())
            .await
        {
            // Notification is a courtesy to a collaborator, not part of the
            // anchoring guarantee.
            error!(%cycle_id, error = %e, "anchor notification failed");
        }

        info!(
            %cycle_id,
            anchor_id = %record.id,
            orders = record.order_count,
            block = record.block_number,
            "anchoring cycle recorded"
        );
        Ok(CycleOutcome::Anchored(record))
    }

    /// Audited orders with no anchor yet: scan the ledger's audit entries,
    /// then drop ids already covered by an anchor record.
    async fn collect_candidates(&self) -> Result<Vec<(i64, String)>> {
        let entries = self.ledger.scan(AUDIT_KEY_PREFIX, SCAN_LIMIT).await?;

        let mut audited: Vec<(i64, String)> = entries
            .into_iter()
            .filter_map(|(key, rev)| order_id_from_key(&key).map(|id| (id, rev.value)))
            .collect();
        audited.sort_by_key(|(id, _)| *id);

        let ids: Vec<i64> = audited.iter().map(|(id, _)| *id).collect();
        let unanchored = self.anchors.unanchored(&ids).await?;

        Ok(audited
            .into_iter()
            .filter(|(id, _)| unanchored.binary_search(id).is_ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::MemoryPublisher;
    use crate::audit::{AuditRecordService, StoreOutcome};
    use crate::ledger::MemoryLedger;
    use crate::merkle::verify_proof;
    use crate::notify::LogNotifier;
    use crate::state::models::TransactionRecord;
    use crate::state::MemoryStore;
    use chrono::TimeZone;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        store: Arc<MemoryStore>,
        publisher: Arc<MemoryPublisher>,
        orchestrator: AnchorOrchestrator,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let orchestrator = AnchorOrchestrator::new(
            ledger.clone(),
            store.clone(),
            publisher.clone(),
            Arc::new(LogNotifier),
        );
        Fixture {
            ledger,
            store,
            publisher,
            orchestrator,
        }
    }

    async fn audit_orders(fx: &Fixture, order_ids: &[i64]) {
        let service = AuditRecordService::new(fx.ledger.clone(), fx.store.clone());
        for &order_id in order_ids {
            let tx = TransactionRecord {
                order_id,
                buyer: Some("b1".into()),
                seller: Some("s1".into()),
                total_credits: 10,
                total_price: 30.0,
                paid_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            };
            assert!(matches!(
                service.store_audit_record(&tx).await.unwrap(),
                StoreOutcome::Stored { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_ledger_is_noop() {
        let fx = fixture();
        assert!(matches!(
            fx.orchestrator.run_cycle().await.unwrap(),
            CycleOutcome::NoCandidates
        ));
    }

    #[tokio::test]
    async fn test_cycle_anchors_batch_with_valid_proofs() {
        let fx = fixture();
        audit_orders(&fx, &[1, 2, 3]).await;

        let outcome = fx.orchestrator.run_cycle().await.unwrap();
        let record = match outcome {
            CycleOutcome::Anchored(record) => record,
            other => panic!("expected anchor, got {other:?}"),
        };
        assert_eq!(record.order_ids, vec![1, 2, 3]);
        assert_eq!(record.order_count, 3);

        // The published root matches an independently rebuilt batch, and
        // every original order has a valid inclusion proof against it.
        let entries: Vec<(i64, String)> = audited_entries(&fx).await;
        let batch = MerkleBatch::build(&entries).unwrap();
        assert_eq!(batch.root_hex(), record.root_digest);
        for proof in &batch.proofs {
            assert!(verify_proof(&batch.root, proof));
        }

        let published = fx.publisher.list_anchors().await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].root_hex, record.root_digest);
        assert_eq!(published[0].metadata.batch_size, 3);
    }

    async fn audited_entries(fx: &Fixture) -> Vec<(i64, String)> {
        fx.ledger
            .scan(AUDIT_KEY_PREFIX, 100)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|(k, rev)| order_id_from_key(&k).map(|id| (id, rev.value)))
            .collect()
    }

    #[tokio::test]
    async fn test_second_cycle_finds_nothing_to_anchor() {
        let fx = fixture();
        audit_orders(&fx, &[1, 2, 3]).await;

        fx.orchestrator.run_cycle().await.unwrap();
        assert!(matches!(
            fx.orchestrator.run_cycle().await.unwrap(),
            CycleOutcome::NoCandidates
        ));
    }

    #[tokio::test]
    async fn test_new_orders_anchor_separately() {
        let fx = fixture();
        audit_orders(&fx, &[1, 2]).await;
        fx.orchestrator.run_cycle().await.unwrap();

        audit_orders(&fx, &[3]).await;
        let outcome = fx.orchestrator.run_cycle().await.unwrap();
        match outcome {
            CycleOutcome::Anchored(record) => assert_eq!(record.order_ids, vec![3]),
            other => panic!("expected anchor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_cycle_is_retryable_with_same_candidates() {
        let fx = fixture();
        audit_orders(&fx, &[1, 2]).await;

        fx.publisher.set_unavailable(true);
        let err = fx.orchestrator.run_cycle().await.unwrap_err();
        assert!(err.is_retryable());

        // Nothing was recorded, so the retry sees the same candidate set.
        fx.publisher.set_unavailable(false);
        match fx.orchestrator.run_cycle().await.unwrap() {
            CycleOutcome::Anchored(record) => assert_eq!(record.order_ids, vec![1, 2]),
            other => panic!("expected anchor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_underfunded_wallet_surfaces_fatally() {
        let fx = fixture();
        audit_orders(&fx, &[1]).await;
        fx.publisher.set_underfunded(true);

        let err = fx.orchestrator.run_cycle().await.unwrap_err();
        assert!(matches!(err, AuditError::InsufficientFunds(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_overlapping_triggers_are_rejected() {
        let fx = fixture();
        audit_orders(&fx, &[1, 2, 3]).await;
        fx.publisher.set_publish_delay_ms(200);

        let orchestrator = Arc::new(fx.orchestrator);
        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_cycle().await })
        };
        // Let the first cycle take the gate and park in publish.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let err = orchestrator.run_cycle().await.unwrap_err();
        assert!(matches!(err, AuditError::CycleInProgress));

        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, CycleOutcome::Anchored(_)));
    }
}
