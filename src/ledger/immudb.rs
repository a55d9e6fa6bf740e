/// HTTP client for an immudb-style append-only ledger gateway.
///
/// The gateway speaks JSON over HTTP and owns the cryptographic state of
/// the ledger; `verify` delegates to its verified-read endpoint, which
/// checks the entry's inclusion and consistency proofs server-side before
/// answering.
///
/// Connection lifecycle: sessions are opened lazily on first use and
/// re-opened transparently after expiry. Transport and auth failures map to
/// `Unavailable` so callers retry instead of misreading them as "key not
/// found".
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{AuditLedger, LedgerRevision};
use crate::error::{AuditError, Result};

/// Connection settings for the ledger gateway.
#[derive(Debug, Clone)]
pub struct ImmudbConfig {
    /// Gateway base URL, e.g. `http://localhost:3323`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

pub struct ImmudbLedger {
    config: ImmudbConfig,
    client: Client,
    /// Session token; None until the first successful login.
    session: RwLock<Option<String>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    user: &'a str,
    password: &'a str,
    database: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct SetRequest<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct SetResponse {
    revision: u64,
}

#[derive(Deserialize)]
struct EntryResponse {
    revision: u64,
    value: String,
    stored_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct HistoryResponse {
    entries: Vec<EntryResponse>,
}

#[derive(Deserialize)]
struct VerifiedGetResponse {
    verified: bool,
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    prefix: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct ScanEntry {
    key: String,
    revision: u64,
    value: String,
    stored_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ScanResponse {
    entries: Vec<ScanEntry>,
}

impl From<EntryResponse> for LedgerRevision {
    fn from(e: EntryResponse) -> Self {
        LedgerRevision {
            revision: e.revision,
            value: e.value,
            stored_at: e.stored_at,
        }
    }
}

fn transport_err(e: reqwest::Error) -> AuditError {
    AuditError::Unavailable(format!("ledger gateway unreachable: {e}"))
}

impl ImmudbLedger {
    pub fn new(config: ImmudbConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            session: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/db/{}/{path}",
            self.config.base_url, self.config.database
        )
    }

    /// Open a session if none exists. Safe to call concurrently; the last
    /// writer wins, which is harmless since any valid token works.
    async fn ensure_session(&self) -> Result<String> {
        if let Some(token) = self.session.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn login(&self) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/login", self.config.base_url))
            .json(&LoginRequest {
                user: &self.config.username,
                password: &self.config.password,
                database: &self.config.database,
            })
            .send()
            .await
            .map_err(transport_err)?;

        if !resp.status().is_success() {
            return Err(AuditError::Unavailable(format!(
                "ledger login failed with status {}",
                resp.status()
            )));
        }

        let login: LoginResponse = resp.json().await.map_err(transport_err)?;
        *self.session.write().await = Some(login.token.clone());
        tracing::debug!("ledger session opened");
        Ok(login.token)
    }

    /// POST a JSON body, re-logging-in once if the session has expired.
    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let mut token = self.ensure_session().await?;

        for attempt in 0..2 {
            let resp = self
                .client
                .post(self.url(path))
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(transport_err)?;

            match resp.status() {
                StatusCode::NOT_FOUND => return Ok(None),
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    // Session expired; reconnect is idempotent.
                    *self.session.write().await = None;
                    token = self.login().await?;
                }
                status if status.is_success() => {
                    let parsed: T = resp.json().await.map_err(|e| {
                        AuditError::Serialization(format!("ledger response parse error: {e}"))
                    })?;
                    return Ok(Some(parsed));
                }
                status => {
                    return Err(AuditError::Unavailable(format!(
                        "ledger gateway returned status {status}"
                    )));
                }
            }
        }

        Err(AuditError::Unavailable(
            "ledger session could not be re-established".into(),
        ))
    }
}

#[async_trait]
impl AuditLedger for ImmudbLedger {
    async fn put(&self, key: &str, value: &str) -> Result<u64> {
        let resp: Option<SetResponse> = self.post_json("set", &SetRequest { key, value }).await?;
        resp.map(|r| r.revision)
            .ok_or_else(|| AuditError::Unavailable("ledger rejected the write".into()))
    }

    async fn get(&self, key: &str) -> Result<Option<LedgerRevision>> {
        let resp: Option<EntryResponse> =
            self.post_json("get", &serde_json::json!({ "key": key })).await?;
        Ok(resp.map(LedgerRevision::from))
    }

    async fn history(&self, key: &str) -> Result<Vec<LedgerRevision>> {
        let resp: Option<HistoryResponse> = self
            .post_json("history", &serde_json::json!({ "key": key }))
            .await?;
        Ok(resp
            .map(|h| h.entries.into_iter().map(LedgerRevision::from).collect())
            .unwrap_or_default())
    }

    async fn verify(&self, key: &str) -> Result<bool> {
        let resp: Option<VerifiedGetResponse> = self
            .post_json("verified/get", &serde_json::json!({ "key": key }))
            .await?;
        Ok(resp.map(|r| r.verified).unwrap_or(false))
    }

    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<(String, LedgerRevision)>> {
        let resp: Option<ScanResponse> = self
            .post_json("scan", &ScanRequest { prefix, limit })
            .await?;
        Ok(resp
            .map(|s| {
                s.entries
                    .into_iter()
                    .map(|e| {
                        (
                            e.key,
                            LedgerRevision {
                                revision: e.revision,
                                value: e.value,
                                stored_at: e.stored_at,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_connected(&self) -> bool {
        if self.ensure_session().await.is_err() {
            return false;
        }
        self.client
            .get(format!("{}/health", self.config.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
