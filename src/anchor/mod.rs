/// On-chain anchoring of audit Merkle roots.
///
/// The anchor module provides a pluggable trait for committing a 32-byte
/// Merkle root (plus batch metadata) to an external append-only contract.
/// The chain provides independent, immutable evidence that the batch of
/// audit digests existed at a given time; only the root goes on-chain,
/// membership stays in the relational store.
pub mod ethereum;
pub mod memory;
pub mod orchestrator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use ethereum::{EthereumConfig, EthereumPublisher};
pub use memory::MemoryPublisher;
pub use orchestrator::{AnchorOrchestrator, CycleOutcome};

/// Opaque metadata committed alongside a root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RootMetadata {
    pub batch_size: u64,
    pub first_order_id: i64,
    pub last_order_id: i64,
}

/// Receipt for a confirmed publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

/// A previously published anchor, as the publisher remembers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedAnchor {
    pub root_hex: String,
    pub metadata: RootMetadata,
    pub receipt: PublishReceipt,
}

/// Publishing wallet details for operator dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    /// Native-unit balance as a decimal string.
    pub balance: String,
}

/// Trait for pluggable chain publishers.
///
/// Failure semantics: network/RPC trouble is `Unavailable` (retryable);
/// an underfunded wallet is `InsufficientFunds` and must surface distinctly
/// so operators do not busy-retry a doomed transaction.
#[async_trait]
pub trait ChainPublisher: Send + Sync {
    /// Commit a root and block until it reaches the configured confirmation
    /// depth (minimum 1), within a bounded wait.
    async fn publish_root(&self, root: &[u8; 32], metadata: &RootMetadata)
        -> Result<PublishReceipt>;

    /// Previously published anchors, oldest first.
    async fn list_anchors(&self) -> Result<Vec<PublishedAnchor>>;

    async fn wallet_info(&self) -> Result<WalletInfo>;

    /// One-time contract setup. Idempotent-guarded: fails with `Conflict`
    /// when an address is already configured, since redeploying would
    /// silently orphan every existing anchor.
    async fn deploy_contract(&self) -> Result<String>;
}
