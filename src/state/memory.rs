/// In-memory implementation of the store traits.
///
/// Behaves like the Postgres store at the trait boundary: set-once paid_at,
/// insert-or-fetch webhook rows, unique anchor membership. Used by tests
/// and by local runs without a database.
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::*;
use super::{AnchorStore, OrderStore, WebhookStore};
use crate::error::{AuditError, Result};

#[derive(Debug, Clone)]
struct OrderRow {
    id: i64,
    order_code: i64,
    buyer: Option<String>,
    seller: Option<String>,
    total_credits: i64,
    total_price: f64,
    status: OrderStatus,
    paid_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn transaction(&self) -> Option<TransactionRecord> {
        let paid_at = self.paid_at?;
        (self.status == OrderStatus::Completed).then(|| TransactionRecord {
            order_id: self.id,
            buyer: self.buyer.clone(),
            seller: self.seller.clone(),
            total_credits: self.total_credits,
            total_price: self.total_price,
            paid_at,
        })
    }
}

#[derive(Default)]
struct Inner {
    orders: BTreeMap<i64, OrderRow>,
    webhooks: HashMap<String, WebhookEvent>,
    anchors: Vec<AnchorRecord>,
    anchored_orders: HashSet<i64>,
    next_order_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pending order, as the order-management collaborator would.
    pub async fn insert_order(
        &self,
        order_code: i64,
        buyer: Option<&str>,
        seller: Option<&str>,
        total_credits: i64,
        total_price: f64,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.next_order_id += 1;
        let id = inner.next_order_id;
        inner.orders.insert(
            id,
            OrderRow {
                id,
                order_code,
                buyer: buyer.map(str::to_string),
                seller: seller.map(str::to_string),
                total_credits,
                total_price,
                status: OrderStatus::Pending,
                paid_at: None,
            },
        );
        id
    }

    /// Seed an already-paid order.
    pub async fn insert_paid_order(
        &self,
        order_code: i64,
        buyer: Option<&str>,
        seller: Option<&str>,
        total_credits: i64,
        total_price: f64,
        paid_at: DateTime<Utc>,
    ) -> i64 {
        let id = self
            .insert_order(order_code, buyer, seller, total_credits, total_price)
            .await;
        let mut inner = self.inner.lock().await;
        let row = inner.orders.get_mut(&id).unwrap();
        row.status = OrderStatus::Completed;
        row.paid_at = Some(paid_at);
        id
    }

    /// Tamper with a stored order field, simulating relational-store drift.
    pub async fn corrupt_price(&self, order_id: i64, new_price: f64) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.orders.get_mut(&order_id) {
            row.total_price = new_price;
        }
    }

    pub async fn webhook_row_count(&self) -> usize {
        self.inner.lock().await.webhooks.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_transaction(&self, order_id: i64) -> Result<Option<TransactionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.get(&order_id).and_then(OrderRow::transaction))
    }

    async fn completed_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter_map(OrderRow::transaction)
            .collect())
    }

    async fn mark_paid(
        &self,
        order_code: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<TransactionRecord> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .orders
            .values_mut()
            .find(|o| o.order_code == order_code)
            .ok_or_else(|| AuditError::NotFound(format!("order code {order_code}")))?;

        row.status = OrderStatus::Completed;
        // Set exactly once; replays keep the original timestamp.
        row.paid_at.get_or_insert(paid_at);
        Ok(row.transaction().expect("order just marked paid"))
    }

    async fn mark_failed(&self, order_code: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner
            .orders
            .values_mut()
            .find(|o| o.order_code == order_code)
        {
            if row.status != OrderStatus::Completed {
                row.status = OrderStatus::Failed;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn find_or_create(
        &self,
        signature: &str,
        order_code: i64,
        payload: &serde_json::Value,
    ) -> Result<WebhookEvent> {
        let mut inner = self.inner.lock().await;
        let event = inner
            .webhooks
            .entry(signature.to_string())
            .or_insert_with(|| WebhookEvent {
                id: Uuid::now_v7(),
                signature: signature.to_string(),
                order_code,
                status: WebhookStatus::Retrying,
                payload: payload.clone(),
                processed_at: None,
                error_message: None,
                retry_count: 0,
                created_at: Utc::now(),
            });
        Ok(event.clone())
    }

    async fn mark_processed(&self, signature: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(event) = inner.webhooks.get_mut(signature) {
            event.status = WebhookStatus::Processed;
            event.processed_at = Some(Utc::now());
            event.error_message = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, signature: &str, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(event) = inner.webhooks.get_mut(signature) {
            event.status = WebhookStatus::Failed;
            event.error_message = Some(error.to_string());
            event.retry_count += 1;
        }
        Ok(())
    }

    async fn find(&self, signature: &str) -> Result<Option<WebhookEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner.webhooks.get(signature).cloned())
    }
}

#[async_trait]
impl AnchorStore for MemoryStore {
    async fn unanchored(&self, order_ids: &[i64]) -> Result<Vec<i64>> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<i64> = order_ids
            .iter()
            .copied()
            .filter(|id| !inner.anchored_orders.contains(id))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn record_anchor(
        &self,
        root_digest: &str,
        tx_hash: &str,
        block_number: i64,
        order_ids: &[i64],
        confirmed_at: DateTime<Utc>,
    ) -> Result<AnchorRecord> {
        let mut inner = self.inner.lock().await;
        if order_ids
            .iter()
            .any(|id| inner.anchored_orders.contains(id))
        {
            return Err(AuditError::Conflict(
                "an order in this batch is already anchored".into(),
            ));
        }

        let record = AnchorRecord {
            id: Uuid::now_v7(),
            root_digest: root_digest.to_string(),
            tx_hash: tx_hash.to_string(),
            block_number,
            order_count: order_ids.len() as i64,
            confirmed_at,
            order_ids: order_ids.to_vec(),
        };
        inner.anchored_orders.extend(order_ids.iter().copied());
        inner.anchors.push(record.clone());
        Ok(record)
    }

    async fn list_anchors(&self) -> Result<Vec<AnchorRecord>> {
        let inner = self.inner.lock().await;
        let mut anchors = inner.anchors.clone();
        anchors.reverse();
        Ok(anchors)
    }
}
