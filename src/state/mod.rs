/// Relational state layer.
///
/// PostgreSQL is the source of truth for order state, webhook
/// deduplication, and confirmed anchors. Access goes through the store
/// traits below so the reconciler, sweeper, and orchestrator can be tested
/// against in-memory fakes without process-wide state.
pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{AuditError, Result};
use models::{AnchorRecord, TransactionRecord, WebhookEvent};

pub use memory::MemoryStore;
pub use repository::PgStore;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AuditError::Unavailable(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Read/transition access to orders. Orders are created by the
/// order-management collaborator; this subsystem only flips payment state.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The completed transaction for an order id, if the order exists and
    /// has been paid.
    async fn find_transaction(&self, order_id: i64) -> Result<Option<TransactionRecord>>;

    /// All completed, paid orders — the audit-eligible set.
    async fn completed_transactions(&self) -> Result<Vec<TransactionRecord>>;

    /// Mark an order completed and set paid_at exactly once: a second call
    /// keeps the original timestamp, so the digest never drifts.
    async fn mark_paid(&self, order_code: i64, paid_at: DateTime<Utc>)
        -> Result<TransactionRecord>;

    /// Mark an order's payment failed. No-op on already-completed orders.
    async fn mark_failed(&self, order_code: i64) -> Result<()>;
}

/// Webhook deduplication rows, unique on provider signature.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Atomic insert-or-fetch on signature. When two deliveries race, the
    /// loser of the insert re-fetches and returns the winner's row.
    async fn find_or_create(
        &self,
        signature: &str,
        order_code: i64,
        payload: &serde_json::Value,
    ) -> Result<WebhookEvent>;

    async fn mark_processed(&self, signature: &str) -> Result<()>;

    /// Record a failure and bump retry_count.
    async fn mark_failed(&self, signature: &str, error: &str) -> Result<()>;

    async fn find(&self, signature: &str) -> Result<Option<WebhookEvent>>;
}

/// Confirmed anchor records and their membership.
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Filter `order_ids` down to those not yet covered by any anchor.
    async fn unanchored(&self, order_ids: &[i64]) -> Result<Vec<i64>>;

    /// Persist one confirmed anchor covering `order_ids`. The membership
    /// table's unique constraint makes double-anchoring a `Conflict`.
    async fn record_anchor(
        &self,
        root_digest: &str,
        tx_hash: &str,
        block_number: i64,
        order_ids: &[i64],
        confirmed_at: DateTime<Utc>,
    ) -> Result<AnchorRecord>;

    /// All anchors, newest first, membership included.
    async fn list_anchors(&self) -> Result<Vec<AnchorRecord>>;
}
