/// PostgreSQL implementations of the store traits.
///
/// All queries are sqlx runtime-checked (not compile-time checked) to
/// avoid requiring a live database during development builds.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use super::{AnchorStore, Database, OrderStore, WebhookStore};
use crate::error::{AuditError, Result};

/// One handle implementing every relational store trait.
#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const TRANSACTION_COLUMNS: &str =
    "id AS order_id, buyer, seller, total_credits, total_price, paid_at";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn find_transaction(&self, order_id: i64) -> Result<Option<TransactionRecord>> {
        let tx = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM orders \
             WHERE id = $1 AND status = 'COMPLETED' AND paid_at IS NOT NULL"
        ))
        .bind(order_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(tx)
    }

    async fn completed_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let txs = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM orders \
             WHERE status = 'COMPLETED' AND paid_at IS NOT NULL ORDER BY id"
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(txs)
    }

    async fn mark_paid(
        &self,
        order_code: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<TransactionRecord> {
        // COALESCE keeps the first paid_at forever; replays cannot move it.
        let tx = sqlx::query_as::<_, TransactionRecord>(&format!(
            "UPDATE orders \
             SET status = 'COMPLETED', paid_at = COALESCE(paid_at, $2) \
             WHERE order_code = $1 \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(order_code)
        .bind(paid_at)
        .fetch_optional(self.db.pool())
        .await?;

        tx.ok_or_else(|| AuditError::NotFound(format!("order code {order_code}")))
    }

    async fn mark_failed(&self, order_code: i64) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET status = 'FAILED' \
             WHERE order_code = $1 AND status <> 'COMPLETED'",
        )
        .bind(order_code)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WebhookStore for PgStore {
    async fn find_or_create(
        &self,
        signature: &str,
        order_code: i64,
        payload: &serde_json::Value,
    ) -> Result<WebhookEvent> {
        if let Some(existing) = self.find(signature).await? {
            return Ok(existing);
        }

        let insert = sqlx::query_as::<_, WebhookEvent>(
            r#"
            INSERT INTO webhook_events (id, signature, order_code, status, payload, retry_count, created_at)
            VALUES ($1, $2, $3, 'RETRYING', $4, 0, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(signature)
        .bind(order_code)
        .bind(payload)
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await;

        match insert {
            Ok(event) => Ok(event),
            // Lost the insert race: adopt the winner's row.
            Err(e) if is_unique_violation(&e) => self
                .find(signature)
                .await?
                .ok_or_else(|| AuditError::Conflict(format!("signature {signature} vanished"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_processed(&self, signature: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_events \
             SET status = 'PROCESSED', processed_at = $2, error_message = NULL \
             WHERE signature = $1",
        )
        .bind(signature)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, signature: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_events \
             SET status = 'FAILED', error_message = $2, retry_count = retry_count + 1 \
             WHERE signature = $1",
        )
        .bind(signature)
        .bind(error)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn find(&self, signature: &str) -> Result<Option<WebhookEvent>> {
        let event =
            sqlx::query_as::<_, WebhookEvent>("SELECT * FROM webhook_events WHERE signature = $1")
                .bind(signature)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(event)
    }
}

#[async_trait]
impl AnchorStore for PgStore {
    async fn unanchored(&self, order_ids: &[i64]) -> Result<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT candidate FROM UNNEST($1::bigint[]) AS candidate \
             WHERE candidate NOT IN (SELECT order_id FROM anchor_orders) \
             ORDER BY candidate",
        )
        .bind(order_ids)
        .fetch_all(self.db.pool())
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn record_anchor(
        &self,
        root_digest: &str,
        tx_hash: &str,
        block_number: i64,
        order_ids: &[i64],
        confirmed_at: DateTime<Utc>,
    ) -> Result<AnchorRecord> {
        let id = Uuid::now_v7();
        let mut txn = self.db.pool().begin().await?;

        let mut record = sqlx::query_as::<_, AnchorRecord>(
            r#"
            INSERT INTO anchor_records (id, root_digest, tx_hash, block_number, order_count, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(root_digest)
        .bind(tx_hash)
        .bind(block_number)
        .bind(order_ids.len() as i64)
        .bind(confirmed_at)
        .fetch_one(&mut *txn)
        .await?;

        let membership = sqlx::query(
            "INSERT INTO anchor_orders (anchor_id, order_id) \
             SELECT $1, order_id FROM UNNEST($2::bigint[]) AS order_id",
        )
        .bind(id)
        .bind(order_ids)
        .execute(&mut *txn)
        .await;

        if let Err(e) = membership {
            txn.rollback().await.ok();
            if is_unique_violation(&e) {
                return Err(AuditError::Conflict(
                    "an order in this batch is already anchored".into(),
                ));
            }
            return Err(e.into());
        }

        txn.commit().await?;

        record.order_ids = order_ids.to_vec();
        Ok(record)
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorRecord>> {
        let mut anchors = sqlx::query_as::<_, AnchorRecord>(
            "SELECT * FROM anchor_records ORDER BY confirmed_at DESC",
        )
        .fetch_all(self.db.pool())
        .await?;

        for anchor in &mut anchors {
            let ids: Vec<(i64,)> = sqlx::query_as(
                "SELECT order_id FROM anchor_orders WHERE anchor_id = $1 ORDER BY order_id",
            )
            .bind(anchor.id)
            .fetch_all(self.db.pool())
            .await?;
            anchor.order_ids = ids.into_iter().map(|(id,)| id).collect();
        }

        Ok(anchors)
    }
}
