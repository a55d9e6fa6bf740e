/// Append-only, tamper-evident audit ledger.
///
/// The ledger is key-addressed with full history: every `put` appends a new
/// revision and "current" is the highest revision. Nothing is ever updated
/// in place or deleted. `verify` is stronger than presence — it asks the
/// backing ledger to re-derive the entry's inclusion proof from its own
/// consistency structure.
///
/// Backends:
/// - `ImmudbLedger`: HTTP gateway client for an immudb-style server
/// - `MemoryLedger`: in-process store for tests and local development
pub mod immudb;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use immudb::{ImmudbConfig, ImmudbLedger};
pub use memory::MemoryLedger;

/// One revision of a ledger key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRevision {
    /// Per-key monotonically increasing revision counter, assigned on write.
    pub revision: u64,
    /// Stored value; for audit entries this is the digest hex string.
    pub value: String,
    pub stored_at: DateTime<Utc>,
}

/// Trait for append-only ledger backends.
///
/// Failure semantics: connection problems surface as
/// `AuditError::Unavailable` (retryable). They must never be conflated with
/// "key not found", which is the `Ok(None)` case of `get`.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Append a new revision for `key`. Returns the assigned revision index.
    async fn put(&self, key: &str, value: &str) -> Result<u64>;

    /// Latest revision for `key`, or None if the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<LedgerRevision>>;

    /// Full revision history for `key`, oldest first. Used for forensic
    /// replay; an unknown key yields an empty history.
    async fn history(&self, key: &str) -> Result<Vec<LedgerRevision>>;

    /// Cryptographically verify the latest revision of `key` against the
    /// ledger's consistency structure. Distinguishes "present" from
    /// "provably untampered".
    async fn verify(&self, key: &str) -> Result<bool>;

    /// Latest revision of every key under `prefix`, at most `limit` entries.
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<(String, LedgerRevision)>>;

    /// Health probe. Implementations must not fail the caller; an unhealthy
    /// backend reports false.
    async fn is_connected(&self) -> bool;
}
