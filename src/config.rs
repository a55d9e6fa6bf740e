/// Environment-driven configuration.
///
/// Everything operational comes from the environment (or a .env file in
/// development). Missing required values fail startup with the variable
/// name; nothing falls back to a production-looking default silently.
use std::env;

use crate::anchor::EthereumConfig;
use crate::error::{AuditError, Result};
use crate::ledger::ImmudbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Audit ledger gateway.
    pub ledger: ImmudbConfig,
    /// Chain publisher settings.
    pub chain: EthereumConfig,
    /// Shared secret for provider webhook signatures.
    pub webhook_secret: String,
    /// Bearer token guarding the admin endpoints.
    pub admin_token: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Seconds between audit sweeps.
    pub sweep_interval_secs: u64,
    /// Optional endpoint notified after each confirmed anchor.
    pub notify_url: Option<String>,
}

fn require(name: &str) -> Result<String> {
    env::var(name).map_err(|_| AuditError::Validation(format!("missing env var {name}")))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AuditError::Validation(format!("unparseable env var {name}={raw}"))),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            ledger: ImmudbConfig {
                base_url: require("LEDGER_URL")?,
                username: require("LEDGER_USERNAME")?,
                password: require("LEDGER_PASSWORD")?,
                database: parse_or("LEDGER_DATABASE", "defaultdb".to_string())?,
            },
            chain: EthereumConfig {
                rpc_url: require("CHAIN_RPC_URL")?,
                from_address: require("CHAIN_FROM_ADDRESS")?,
                contract_address: optional("ANCHOR_CONTRACT_ADDRESS"),
                confirmations: parse_or("ANCHOR_CONFIRMATIONS", 1)?,
                confirm_timeout_ms: parse_or("ANCHOR_CONFIRM_TIMEOUT_MS", 60_000)?,
                poll_interval_ms: parse_or("ANCHOR_POLL_INTERVAL_MS", 1_000)?,
            },
            webhook_secret: require("WEBHOOK_SECRET")?,
            admin_token: require("ADMIN_TOKEN")?,
            http_port: parse_or("HTTP_PORT", 8085)?,
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 300)?,
            notify_url: optional("NOTIFY_URL"),
        })
    }
}
