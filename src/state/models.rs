/// Typed records for the relational store.
///
/// Everything crossing the database boundary is an explicit struct mapped
/// via sqlx; no dynamic shapes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::digest;
use crate::error::{AuditError, Result};

/// Order lifecycle as far as this subsystem cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

/// The audited unit: a completed, paid order projected down to the six
/// digest-relevant fields. paid_at is set exactly once and never mutated;
/// refunds create compensating records elsewhere, not edits here.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub order_id: i64,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub total_credits: i64,
    pub total_price: f64,
    pub paid_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Reject shapes that must never reach the ledger.
    pub fn validate(&self) -> Result<()> {
        if self.total_credits < 0 {
            return Err(AuditError::Validation(format!(
                "order {} has negative credits",
                self.order_id
            )));
        }
        if !(self.total_price.is_finite() && self.total_price >= 0.0) {
            return Err(AuditError::Validation(format!(
                "order {} has an invalid price",
                self.order_id
            )));
        }
        Ok(())
    }

    /// Canonical integrity digest over the audit-relevant fields.
    pub fn digest(&self) -> String {
        digest::transaction_digest(
            self.order_id,
            self.buyer.as_deref(),
            self.seller.as_deref(),
            self.total_credits,
            self.total_price,
            self.paid_at.timestamp_millis(),
        )
    }
}

/// Deduplication state of one provider delivery signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_status", rename_all = "UPPERCASE")]
pub enum WebhookStatus {
    Processed,
    Failed,
    Retrying,
}

/// One logical webhook delivery, unique on signature. Never deleted; only
/// status/retry_count advance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub signature: String,
    pub order_code: i64,
    pub status: WebhookStatus,
    pub payload: serde_json::Value,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

/// A confirmed on-chain commitment covering a batch of audited orders.
/// Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    /// Merkle root over the batch, lowercase hex.
    pub root_digest: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub order_count: i64,
    pub confirmed_at: DateTime<Utc>,
    /// Membership, loaded from anchor_orders.
    #[sqlx(skip)]
    pub order_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> TransactionRecord {
        TransactionRecord {
            order_id: 42,
            buyer: Some("b1".into()),
            seller: Some("s1".into()),
            total_credits: 10,
            total_price: 30.0,
            paid_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_record_digest_matches_known_vector() {
        assert_eq!(
            record().digest(),
            "11c71bae410cf67e213f4e37a9ed52eee6d75ba34bbd130d19a4c32f8582a411"
        );
    }

    #[test]
    fn test_validate_rejects_negative_credits() {
        let mut tx = record();
        tx.total_credits = -1;
        assert!(matches!(tx.validate(), Err(AuditError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_non_finite_price() {
        let mut tx = record();
        tx.total_price = f64::NAN;
        assert!(tx.validate().is_err());
        tx.total_price = -0.01;
        assert!(tx.validate().is_err());
    }
}
