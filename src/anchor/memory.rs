/// In-process chain publisher for tests and local development.
///
/// Deterministic: the "transaction hash" is derived from the root and a
/// publish counter. Failure and latency injection let tests exercise the
/// orchestrator's failure and serialization paths.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{ChainPublisher, PublishReceipt, PublishedAnchor, RootMetadata, WalletInfo};
use crate::error::{AuditError, Result};

#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<PublishedAnchor>>,
    contract_address: Mutex<Option<String>>,
    counter: AtomicU64,
    fail_unavailable: AtomicBool,
    fail_underfunded: AtomicBool,
    publish_delay_ms: AtomicU64,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self {
            contract_address: Mutex::new(Some("0xanchor".into())),
            ..Self::default()
        }
    }

    /// A publisher with no contract configured, for deploy tests.
    pub fn undeployed() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, failing: bool) {
        self.fail_unavailable.store(failing, Ordering::SeqCst);
    }

    pub fn set_underfunded(&self, underfunded: bool) {
        self.fail_underfunded.store(underfunded, Ordering::SeqCst);
    }

    pub fn set_publish_delay_ms(&self, ms: u64) {
        self.publish_delay_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainPublisher for MemoryPublisher {
    async fn publish_root(
        &self,
        root: &[u8; 32],
        metadata: &RootMetadata,
    ) -> Result<PublishReceipt> {
        let delay = self.publish_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.fail_underfunded.load(Ordering::SeqCst) {
            return Err(AuditError::InsufficientFunds(
                "publishing account has zero balance".into(),
            ));
        }
        if self.fail_unavailable.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("chain RPC unreachable".into()));
        }

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(root);
        hasher.update(seq.to_be_bytes());
        let receipt = PublishReceipt {
            tx_hash: format!("0x{}", hex::encode(hasher.finalize())),
            block_number: 100 + seq,
        };

        self.published.lock().await.push(PublishedAnchor {
            root_hex: hex::encode(root),
            metadata: *metadata,
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }

    async fn list_anchors(&self) -> Result<Vec<PublishedAnchor>> {
        Ok(self.published.lock().await.clone())
    }

    async fn wallet_info(&self) -> Result<WalletInfo> {
        Ok(WalletInfo {
            address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
            balance: if self.fail_underfunded.load(Ordering::SeqCst) {
                "0".into()
            } else {
                "1000000000000000000".into()
            },
        })
    }

    async fn deploy_contract(&self) -> Result<String> {
        let mut address = self.contract_address.lock().await;
        if let Some(existing) = address.as_deref() {
            return Err(AuditError::Conflict(format!(
                "anchor contract already deployed at {existing}"
            )));
        }
        let deployed = "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string();
        *address = Some(deployed.clone());
        Ok(deployed)
    }
}
