/// Payment-provider webhook reconciliation.
///
/// The provider delivers at-least-once; this module turns that into
/// exactly-once business effects. Deduplication hangs off the provider
/// signature (unique per logical delivery), the signature itself is an
/// HMAC-SHA256 over the canonical JSON payload, and the order mutation is
/// set-once, so replays and races all converge on the same final state.
///
/// Trust boundary: only the signed payload is authenticated. Every fact
/// that drives a mutation (order code, payment status, timestamp) is read
/// out of the payload after the signature has been verified; the envelope
/// fields are routing hints and are cross-checked, never trusted.
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::audit::AuditRecordService;
use crate::error::{AuditError, Result};
use crate::state::models::WebhookStatus;
use crate::state::{OrderStore, WebhookStore};

type HmacSha256 = Hmac<Sha256>;

/// Payment state the provider is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

/// One inbound delivery, as posted by the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    /// HMAC-SHA256 over the canonical JSON of `payload`, lowercase hex.
    pub signature: String,
    /// Envelope routing hint. Recorded on the dedup row; must agree with
    /// the order code inside the signed payload before anything mutates.
    pub order_code: i64,
    /// Provider payload, verbatim; the authenticated source of truth.
    pub payload: serde_json::Value,
}

/// The signed facts, parsed from the payload only after verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiedPayment {
    order_code: i64,
    status: PaymentStatus,
    paid_at_epoch_ms: Option<i64>,
}

impl VerifiedPayment {
    fn paid_at(&self) -> DateTime<Utc> {
        self.paid_at_epoch_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now)
    }
}

/// What a delivery actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Order transitioned and audit entry written.
    Processed,
    /// Duplicate of an already-processed signature; nothing changed.
    AlreadyProcessed,
    /// Order transitioned but the ledger write failed; the sweeper will
    /// catch the order up. The provider should not redeliver.
    Deferred,
    /// Delivery rejected before any order mutation.
    Rejected(String),
}

/// Serde's default map preserves key order as sorted, so serializing the
/// payload value reproduces the provider's canonical form.
fn signature_matches(secret: &str, payload: &serde_json::Value, signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.to_string().as_bytes());
    mac.verify_slice(&provided).is_ok()
}

pub struct WebhookReconciler {
    webhooks: Arc<dyn WebhookStore>,
    orders: Arc<dyn OrderStore>,
    audit: Arc<AuditRecordService>,
    secret: String,
}

impl WebhookReconciler {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        orders: Arc<dyn OrderStore>,
        audit: Arc<AuditRecordService>,
        secret: String,
    ) -> Self {
        Self {
            webhooks,
            orders,
            audit,
            secret,
        }
    }

    /// Process one delivery. Safe to call concurrently for the same
    /// signature: the store's insert-or-fetch resolves the race to a single
    /// row, and every downstream mutation is idempotent.
    pub async fn handle(&self, delivery: &WebhookDelivery) -> Result<WebhookOutcome> {
        let event = self
            .webhooks
            .find_or_create(&delivery.signature, delivery.order_code, &delivery.payload)
            .await?;

        if event.status == WebhookStatus::Processed {
            info!(
                order_code = delivery.order_code,
                "duplicate webhook delivery ignored"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        if !signature_matches(&self.secret, &delivery.payload, &delivery.signature) {
            warn!(
                order_code = delivery.order_code,
                "webhook signature validation failed"
            );
            return self
                .reject(&delivery.signature, "signature validation failed")
                .await;
        }

        // The payload is authenticated from here on; the envelope is not.
        let payment: VerifiedPayment = match serde_json::from_value(delivery.payload.clone()) {
            Ok(payment) => payment,
            Err(_) => {
                warn!(
                    order_code = delivery.order_code,
                    "webhook payload missing order code or status"
                );
                return self
                    .reject(&delivery.signature, "payload missing order code or status")
                    .await;
            }
        };
        if payment.order_code != delivery.order_code {
            warn!(
                envelope_order_code = delivery.order_code,
                payload_order_code = payment.order_code,
                "webhook envelope order code does not match signed payload"
            );
            return self
                .reject(&delivery.signature, "order code mismatch with signed payload")
                .await;
        }

        match payment.status {
            PaymentStatus::Failed => {
                self.orders.mark_failed(payment.order_code).await?;
                self.webhooks.mark_processed(&delivery.signature).await?;
                info!(order_code = payment.order_code, "payment failure recorded");
                Ok(WebhookOutcome::Processed)
            }
            PaymentStatus::Paid => self.handle_paid(&delivery.signature, &payment).await,
        }
    }

    async fn reject(&self, signature: &str, reason: &str) -> Result<WebhookOutcome> {
        self.webhooks.mark_failed(signature, reason).await?;
        Ok(WebhookOutcome::Rejected(reason.into()))
    }

    async fn handle_paid(
        &self,
        signature: &str,
        payment: &VerifiedPayment,
    ) -> Result<WebhookOutcome> {
        let tx = match self
            .orders
            .mark_paid(payment.order_code, payment.paid_at())
            .await
        {
            Ok(tx) => tx,
            Err(AuditError::NotFound(_)) => {
                warn!(
                    order_code = payment.order_code,
                    "webhook references unknown order"
                );
                return self.reject(signature, "order not found").await;
            }
            Err(e) => return Err(e),
        };

        // The order is paid regardless of what happens to the ledger write;
        // a lagging audit entry is the sweeper's job, not a reason to make
        // the provider redeliver.
        if let Err(e) = self.audit.store_audit_record(&tx).await {
            warn!(
                order_id = tx.order_id,
                error = %e,
                "audit write deferred after payment"
            );
            self.webhooks
                .mark_failed(signature, &format!("audit write failed: {e}"))
                .await?;
            return Ok(WebhookOutcome::Deferred);
        }

        self.webhooks.mark_processed(signature).await?;
        info!(
            order_id = tx.order_id,
            order_code = payment.order_code,
            "payment processed and audited"
        );
        Ok(WebhookOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::audit_key;
    use crate::ledger::{AuditLedger, MemoryLedger};
    use crate::state::MemoryStore;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        store: Arc<MemoryStore>,
        reconciler: WebhookReconciler,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditRecordService::new(ledger.clone(), store.clone()));
        let reconciler =
            WebhookReconciler::new(store.clone(), store.clone(), audit, SECRET.into());
        Fixture {
            ledger,
            store,
            reconciler,
        }
    }

    fn sign(payload: &serde_json::Value) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn paid_payload(order_code: i64, paid_at_ms: i64) -> serde_json::Value {
        json!({
            "orderCode": order_code,
            "amount": 30,
            "status": "paid",
            "paidAtEpochMs": paid_at_ms,
        })
    }

    fn delivery_for(payload: serde_json::Value, order_code: i64) -> WebhookDelivery {
        WebhookDelivery {
            signature: sign(&payload),
            order_code,
            payload,
        }
    }

    fn paid_delivery(order_code: i64) -> WebhookDelivery {
        delivery_for(paid_payload(order_code, 1_700_000_000_000), order_code)
    }

    #[test]
    fn test_signature_matches_known_vector() {
        // Key order in the literal differs from canonical order on purpose.
        let payload = json!({"orderCode": 42, "amount": 30});
        assert_eq!(payload.to_string(), r#"{"amount":30,"orderCode":42}"#);
        assert!(signature_matches(
            SECRET,
            &payload,
            "31ee624712fec15f0c4dc6c7719aa0c6720bb6e2b9ec8f2d0f573968e5553def"
        ));
        assert!(!signature_matches(SECRET, &payload, "deadbeef"));
        assert!(!signature_matches(SECRET, &payload, "not hex"));
    }

    #[tokio::test]
    async fn test_paid_delivery_transitions_and_audits() {
        let fx = fixture();
        let id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;

        let delivery = paid_delivery(42);
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let tx = fx.store.find_transaction(id).await.unwrap().unwrap();
        assert_eq!(tx.paid_at.timestamp_millis(), 1_700_000_000_000);
        let stored = fx.ledger.get(&audit_key(id)).await.unwrap().unwrap();
        assert_eq!(stored.value, tx.digest());

        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Processed);
        assert!(event.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_exactly_once() {
        let fx = fixture();
        let id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;

        let delivery = paid_delivery(42);
        fx.reconciler.handle(&delivery).await.unwrap();
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);

        assert_eq!(fx.store.webhook_row_count().await, 1);
        assert_eq!(fx.ledger.history(&audit_key(id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_later_signed_delivery_keeps_original_paid_at() {
        let fx = fixture();
        let id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;

        fx.reconciler.handle(&paid_delivery(42)).await.unwrap();
        let first_paid_at = fx.store.find_transaction(id).await.unwrap().unwrap().paid_at;

        // A second, distinctly-signed delivery carries a later timestamp;
        // paid_at is set once, so the digest and history do not move.
        let later = delivery_for(paid_payload(42, 1_700_000_999_999), 42);
        let outcome = fx.reconciler.handle(&later).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let tx = fx.store.find_transaction(id).await.unwrap().unwrap();
        assert_eq!(tx.paid_at, first_paid_at);
        assert_eq!(fx.ledger.history(&audit_key(id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_mutates_nothing_but_the_event() {
        let fx = fixture();
        let id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;

        let mut delivery = paid_delivery(42);
        delivery.signature = "0".repeat(64);
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Rejected(_)));

        assert!(fx.store.find_transaction(id).await.unwrap().is_none());
        assert!(fx.ledger.get(&audit_key(id)).await.unwrap().is_none());
        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.retry_count, 1);
        assert!(event.error_message.unwrap().contains("signature"));
    }

    #[tokio::test]
    async fn test_forged_envelope_order_code_is_rejected() {
        let fx = fixture();
        let signed_id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;
        let victim_id = fx.store.insert_order(99, Some("b2"), Some("s2"), 5, 15.0).await;

        // A validly-signed payload for order 42, replayed with the envelope
        // pointed at order 99. The signed payload wins; nothing is paid.
        let delivery = delivery_for(paid_payload(42, 1_700_000_000_000), 99);
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Rejected("order code mismatch with signed payload".into())
        );

        assert!(fx.store.find_transaction(victim_id).await.unwrap().is_none());
        assert!(fx.store.find_transaction(signed_id).await.unwrap().is_none());
        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert!(event.error_message.unwrap().contains("mismatch"));
    }

    #[tokio::test]
    async fn test_payload_without_status_is_rejected() {
        let fx = fixture();
        let id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;

        // Signed, but the payload carries no status claim to act on.
        let payload = json!({"orderCode": 42, "amount": 30});
        let delivery = delivery_for(payload, 42);
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Rejected(_)));
        assert!(fx.store.find_transaction(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_order_code_is_rejected_and_kept() {
        let fx = fixture();
        let delivery = paid_delivery(999);

        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Rejected("order not found".into()));

        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.error_message.as_deref(), Some("order not found"));
    }

    #[tokio::test]
    async fn test_failed_payment_marks_order_failed() {
        let fx = fixture();
        let id = fx.store.insert_order(42, None, None, 10, 30.0).await;

        let payload = json!({"orderCode": 42, "status": "failed", "reason": "card declined"});
        let delivery = delivery_for(payload, 42);
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        // A failed order is not a completed transaction.
        assert!(fx.store.find_transaction(id).await.unwrap().is_none());
        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Processed);
    }

    #[tokio::test]
    async fn test_audit_lag_defers_and_sweeper_heals() {
        let fx = fixture();
        let id = fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;
        fx.ledger.poison(&audit_key(id)).await;

        let delivery = paid_delivery(42);
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Deferred);

        // The payment stuck even though the ledger write did not.
        let tx = fx.store.find_transaction(id).await.unwrap().unwrap();
        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.retry_count, 1);

        // Once the ledger recovers, a sweep catches the order up.
        fx.ledger.heal(&audit_key(id)).await;
        let audit = AuditRecordService::new(fx.ledger.clone(), fx.store.clone());
        let report = audit.process_all_completed_orders().await.unwrap();
        assert_eq!(report.stored, 1);
        let stored = fx.ledger.get(&audit_key(id)).await.unwrap().unwrap();
        assert_eq!(stored.value, tx.digest());
    }

    #[tokio::test]
    async fn test_concurrent_same_signature_converges_to_one_row() {
        let fx = fixture();
        fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;

        let reconciler = Arc::new(fx.reconciler);
        let delivery = paid_delivery(42);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let reconciler = reconciler.clone();
                let delivery = delivery.clone();
                tokio::spawn(async move { reconciler.handle(&delivery).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(fx.store.webhook_row_count().await, 1);
        let event = reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Processed);
        assert_eq!(fx.store.completed_transactions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_event_can_be_retried() {
        let fx = fixture();
        let delivery = paid_delivery(42);

        // First attempt fails: order does not exist yet.
        fx.reconciler.handle(&delivery).await.unwrap();
        // The collaborator creates the order; the provider redelivers.
        fx.store.insert_order(42, Some("b1"), Some("s1"), 10, 30.0).await;
        let outcome = fx.reconciler.handle(&delivery).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let event = fx
            .reconciler
            .webhooks
            .find(&delivery.signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Processed);
        assert_eq!(event.retry_count, 1);
    }
}
