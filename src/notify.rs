/// Outbound "anchor confirmed" notifications.
///
/// The notification consumer is an external collaborator; delivery is
/// best-effort and never fails an anchoring cycle.
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AuditError, Result};

#[async_trait]
pub trait AnchorNotifier: Send + Sync {
    async fn anchor_confirmed(
        &self,
        anchor_id: Uuid,
        order_ids: &[i64],
        audit_count: usize,
    ) -> Result<()>;
}

/// Logs the notification; the default when no endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl AnchorNotifier for LogNotifier {
    async fn anchor_confirmed(
        &self,
        anchor_id: Uuid,
        order_ids: &[i64],
        audit_count: usize,
    ) -> Result<()> {
        tracing::info!(%anchor_id, ?order_ids, audit_count, "anchor confirmed");
        Ok(())
    }
}

#[derive(Serialize)]
struct AnchorConfirmedPayload<'a> {
    anchor_id: Uuid,
    order_ids: &'a [i64],
    audit_count: usize,
}

/// POSTs the notification to the collaborator's endpoint.
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl AnchorNotifier for HttpNotifier {
    async fn anchor_confirmed(
        &self,
        anchor_id: Uuid,
        order_ids: &[i64],
        audit_count: usize,
    ) -> Result<()> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&AnchorConfirmedPayload {
                anchor_id,
                order_ids,
                audit_count,
            })
            .send()
            .await
            .map_err(|e| AuditError::Unavailable(format!("notification endpoint: {e}")))?;

        if !resp.status().is_success() {
            return Err(AuditError::Unavailable(format!(
                "notification endpoint returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
