/// In-process append-only ledger.
///
/// Mirrors the immudb backend's observable behavior: per-key monotonic
/// revisions, full history, prefix scans. Keys can be poisoned so tests can
/// exercise partial-failure isolation in batch paths.
use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{AuditLedger, LedgerRevision};
use crate::error::{AuditError, Result};

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<BTreeMap<String, Vec<LedgerRevision>>>,
    poisoned: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `key` fail with `Unavailable`.
    pub async fn poison(&self, key: &str) {
        self.poisoned.lock().await.insert(key.to_string());
    }

    /// Lift a poison, simulating the ledger coming back.
    pub async fn heal(&self, key: &str) {
        self.poisoned.lock().await.remove(key);
    }

    async fn check_poisoned(&self, key: &str) -> Result<()> {
        if self.poisoned.lock().await.contains(key) {
            return Err(AuditError::Unavailable(format!(
                "ledger write rejected for {key}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLedger for MemoryLedger {
    async fn put(&self, key: &str, value: &str) -> Result<u64> {
        self.check_poisoned(key).await?;
        let mut entries = self.entries.lock().await;
        let history = entries.entry(key.to_string()).or_default();
        let revision = history.len() as u64 + 1;
        history.push(LedgerRevision {
            revision,
            value: value.to_string(),
            stored_at: Utc::now(),
        });
        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<Option<LedgerRevision>> {
        self.check_poisoned(key).await?;
        let entries = self.entries.lock().await;
        Ok(entries.get(key).and_then(|h| h.last().cloned()))
    }

    async fn history(&self, key: &str) -> Result<Vec<LedgerRevision>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned().unwrap_or_default())
    }

    async fn verify(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries.contains_key(key))
    }

    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<(String, LedgerRevision)>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, h)| h.last().map(|rev| (k.clone(), rev.clone())))
            .take(limit)
            .collect())
    }

    async fn is_connected(&self) -> bool {
        true
    }
}
