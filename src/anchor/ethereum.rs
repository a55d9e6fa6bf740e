/// Ethereum anchor publisher.
///
/// Talks raw JSON-RPC to a node whose publishing account is unlocked
/// (a dev-chain setup: the node signs, we submit). Each anchor is one
/// transaction to the anchor contract with calldata
/// `selector || root || batch_size || first_order_id || last_order_id`,
/// every argument left-padded to a 32-byte word.
///
/// Publishing blocks until the transaction reaches the configured
/// confirmation depth or the bounded wait expires.
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ChainPublisher, PublishReceipt, PublishedAnchor, RootMetadata, WalletInfo};
use crate::error::{AuditError, Result};

/// 4-byte method selector for anchorRoot(bytes32,uint256,uint256,uint256).
const ANCHOR_SELECTOR: [u8; 4] = [0x5b, 0x0e, 0x0c, 0x5f];

/// Topic of the RootAnchored event the contract emits per anchor. Listing
/// anchors is a log query, so history survives restarts of this process.
const ANCHOR_EVENT_TOPIC: &str =
    "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

/// Creation bytecode for the anchor contract: an append-only event log —
/// every call to anchorRoot emits the root and metadata, nothing is ever
/// overwritten.
const CONTRACT_BYTECODE: &str = include_str!("anchor_contract.hex");

/// Configuration for the Ethereum publisher.
#[derive(Debug, Clone)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint of the node holding the unlocked account.
    pub rpc_url: String,
    /// Publishing account address (0x-prefixed).
    pub from_address: String,
    /// Anchor contract address; None until deploy_contract has run.
    pub contract_address: Option<String>,
    /// Confirmation depth before a publish counts as final (minimum 1).
    pub confirmations: u64,
    /// Bounded wait for confirmation.
    pub confirm_timeout_ms: u64,
    /// Receipt polling cadence.
    pub poll_interval_ms: u64,
}

pub struct EthereumPublisher {
    config: EthereumConfig,
    client: Client,
    contract_address: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
struct TxReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(rename = "contractAddress")]
    contract_address: Option<String>,
    status: Option<String>,
}

/// Classify a JSON-RPC error string. Underfunded wallets are fatal and must
/// never be folded into the retryable bucket.
fn classify_rpc_error(message: &str) -> AuditError {
    if message.to_lowercase().contains("insufficient funds") {
        AuditError::InsufficientFunds(message.to_string())
    } else {
        AuditError::Unavailable(format!("chain RPC error: {message}"))
    }
}

fn parse_hex_u64(hex_str: &str) -> Result<u64> {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| AuditError::Serialization(format!("bad hex quantity {hex_str:?}: {e}")))
}

fn parse_hex_u128(hex_str: &str) -> Result<u128> {
    u128::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| AuditError::Serialization(format!("bad hex quantity {hex_str:?}: {e}")))
}

/// Decode one RootAnchored log back into the anchor it recorded. The event
/// data mirrors the calldata words: root, then batch_size, first and last
/// order id, each a 32-byte word.
fn decode_anchor_log(log: &LogEntry) -> Result<PublishedAnchor> {
    let data = hex::decode(log.data.trim_start_matches("0x"))
        .map_err(|e| AuditError::Serialization(format!("bad anchor log data: {e}")))?;
    if data.len() != 128 {
        return Err(AuditError::Serialization(format!(
            "anchor log data has {} bytes, expected 128",
            data.len()
        )));
    }

    let word_u64 = |offset: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data[offset + 24..offset + 32]);
        u64::from_be_bytes(buf)
    };

    Ok(PublishedAnchor {
        root_hex: hex::encode(&data[..32]),
        metadata: RootMetadata {
            batch_size: word_u64(32),
            first_order_id: word_u64(64) as i64,
            last_order_id: word_u64(96) as i64,
        },
        receipt: PublishReceipt {
            tx_hash: log.transaction_hash.clone(),
            block_number: parse_hex_u64(&log.block_number)?,
        },
    })
}

/// ABI-style calldata: selector, then each argument as a 32-byte word.
fn encode_calldata(root: &[u8; 32], metadata: &RootMetadata) -> String {
    let mut data = Vec::with_capacity(4 + 32 * 4);
    data.extend_from_slice(&ANCHOR_SELECTOR);
    data.extend_from_slice(root);
    for word in [
        metadata.batch_size,
        metadata.first_order_id as u64,
        metadata.last_order_id as u64,
    ] {
        data.extend_from_slice(&[0u8; 24]);
        data.extend_from_slice(&word.to_be_bytes());
    }
    format!("0x{}", hex::encode(data))
}

impl EthereumPublisher {
    pub fn new(config: EthereumConfig) -> Self {
        let contract_address = RwLock::new(config.contract_address.clone());
        Self {
            config,
            client: Client::new(),
            contract_address,
        }
    }

    /// Send a JSON-RPC request to the node.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuditError::Unavailable(format!("chain RPC unreachable: {e}")))?
            .json()
            .await
            .map_err(|e| AuditError::Serialization(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(classify_rpc_error(&err.message));
        }

        resp.result
            .ok_or_else(|| AuditError::Unavailable("empty RPC response".into()))
    }

    /// The wallet must be able to pay for gas before we bother the node.
    async fn preflight_balance(&self) -> Result<()> {
        let balance_hex: String = self
            .rpc_call(
                "eth_getBalance",
                serde_json::json!([&self.config.from_address, "latest"]),
            )
            .await?;
        if parse_hex_u128(&balance_hex)? == 0 {
            return Err(AuditError::InsufficientFunds(format!(
                "publishing account {} has zero balance",
                self.config.from_address
            )));
        }
        Ok(())
    }

    /// Poll until the transaction is mined to the configured depth, within
    /// the bounded wait. No receipt before the deadline means the cycle
    /// fails retryably; the transaction may still land later, which is
    /// harmless since nothing was recorded.
    async fn await_confirmation(&self, tx_hash: &str) -> Result<PublishReceipt> {
        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_millis(self.config.confirm_timeout_ms);
        let poll = std::time::Duration::from_millis(self.config.poll_interval_ms);
        let required = self.config.confirmations.max(1);

        loop {
            let receipt: Option<TxReceipt> = self
                .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await?;

            if let Some(receipt) = receipt {
                if receipt.status.as_deref() == Some("0x0") {
                    return Err(AuditError::Unavailable(format!(
                        "anchor transaction {tx_hash} reverted"
                    )));
                }
                if let Some(block_hex) = &receipt.block_number {
                    let mined_at = parse_hex_u64(block_hex)?;
                    let head_hex: String =
                        self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
                    let head = parse_hex_u64(&head_hex)?;
                    let depth = head.saturating_sub(mined_at) + 1;
                    if depth >= required {
                        return Ok(PublishReceipt {
                            tx_hash: tx_hash.to_string(),
                            block_number: mined_at,
                        });
                    }
                    debug!(tx_hash, depth, required, "waiting for confirmation depth");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AuditError::Unavailable(format!(
                    "confirmation timeout after {}ms for {tx_hash}",
                    self.config.confirm_timeout_ms
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl ChainPublisher for EthereumPublisher {
    async fn publish_root(
        &self,
        root: &[u8; 32],
        metadata: &RootMetadata,
    ) -> Result<PublishReceipt> {
        let contract = self
            .contract_address
            .read()
            .await
            .clone()
            .ok_or_else(|| {
                AuditError::Validation("anchor contract address not configured".into())
            })?;

        self.preflight_balance().await?;

        let tx_hash: String = self
            .rpc_call(
                "eth_sendTransaction",
                serde_json::json!([{
                    "from": self.config.from_address,
                    "to": contract,
                    "gas": "0x30d40",
                    "data": encode_calldata(root, metadata),
                }]),
            )
            .await?;

        info!(tx_hash, batch_size = metadata.batch_size, "anchor submitted");
        self.await_confirmation(&tx_hash).await
    }

    /// Rebuilt from the contract's event log on every call, so the list is
    /// complete even after a process restart.
    async fn list_anchors(&self) -> Result<Vec<PublishedAnchor>> {
        let contract = self.contract_address.read().await.clone();
        let Some(contract) = contract else {
            // No contract means nothing has ever been anchored.
            return Ok(Vec::new());
        };

        let logs: Vec<LogEntry> = self
            .rpc_call(
                "eth_getLogs",
                serde_json::json!([{
                    "address": contract,
                    "fromBlock": "0x0",
                    "toBlock": "latest",
                    "topics": [ANCHOR_EVENT_TOPIC],
                }]),
            )
            .await?;

        logs.iter().map(decode_anchor_log).collect()
    }

    async fn wallet_info(&self) -> Result<WalletInfo> {
        let balance_hex: String = self
            .rpc_call(
                "eth_getBalance",
                serde_json::json!([&self.config.from_address, "latest"]),
            )
            .await?;
        Ok(WalletInfo {
            address: self.config.from_address.clone(),
            balance: parse_hex_u128(&balance_hex)?.to_string(),
        })
    }

    async fn deploy_contract(&self) -> Result<String> {
        {
            let current = self.contract_address.read().await;
            if let Some(address) = current.as_deref() {
                return Err(AuditError::Conflict(format!(
                    "anchor contract already deployed at {address}; redeploying would orphan existing anchors"
                )));
            }
        }

        self.preflight_balance().await?;

        let tx_hash: String = self
            .rpc_call(
                "eth_sendTransaction",
                serde_json::json!([{
                    "from": self.config.from_address,
                    "gas": "0xf4240",
                    "data": CONTRACT_BYTECODE.trim(),
                }]),
            )
            .await?;

        let _ = self.await_confirmation(&tx_hash).await?;

        let receipt: Option<TxReceipt> = self
            .rpc_call("eth_getTransactionReceipt", serde_json::json!([&tx_hash]))
            .await?;
        let address = receipt
            .and_then(|r| r.contract_address)
            .ok_or_else(|| AuditError::Unavailable("deploy receipt missing contract address".into()))?;

        info!(address, "anchor contract deployed");
        *self.contract_address.write().await = Some(address.clone());
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_is_fatal_not_retryable() {
        let err = classify_rpc_error("insufficient funds for gas * price + value");
        assert!(matches!(err, AuditError::InsufficientFunds(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_rpc_errors_are_retryable() {
        let err = classify_rpc_error("nonce too low");
        assert!(matches!(err, AuditError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_hex_quantity_parsing() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_anchor_log_decodes_root_and_metadata() {
        let mut data = Vec::with_capacity(128);
        data.extend_from_slice(&[0xAB; 32]);
        for word in [3u64, 1, 42] {
            data.extend_from_slice(&[0u8; 24]);
            data.extend_from_slice(&word.to_be_bytes());
        }
        let log = LogEntry {
            data: format!("0x{}", hex::encode(&data)),
            block_number: "0x10".into(),
            transaction_hash: "0xfeed".into(),
        };

        let anchor = decode_anchor_log(&log).unwrap();
        assert_eq!(anchor.root_hex, hex::encode([0xAB; 32]));
        assert_eq!(anchor.metadata.batch_size, 3);
        assert_eq!(anchor.metadata.first_order_id, 1);
        assert_eq!(anchor.metadata.last_order_id, 42);
        assert_eq!(anchor.receipt.tx_hash, "0xfeed");
        assert_eq!(anchor.receipt.block_number, 16);
    }

    #[test]
    fn test_truncated_anchor_log_rejected() {
        let log = LogEntry {
            data: "0xabcd".into(),
            block_number: "0x1".into(),
            transaction_hash: "0x1".into(),
        };
        assert!(matches!(
            decode_anchor_log(&log),
            Err(AuditError::Serialization(_))
        ));
    }

    #[test]
    fn test_calldata_layout() {
        let meta = RootMetadata {
            batch_size: 3,
            first_order_id: 1,
            last_order_id: 42,
        };
        let data = encode_calldata(&[0xAB; 32], &meta);
        // 0x + selector(4) + root(32) + three 32-byte words, hex-encoded.
        assert_eq!(data.len(), 2 + 2 * (4 + 32 * 4));
        assert!(data.starts_with("0x5b0e0c5f"));
        assert!(data.ends_with("2a")); // last word is order id 42
    }
}
