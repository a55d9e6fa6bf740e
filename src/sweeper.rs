/// Periodic audit sweep.
///
/// Webhook deliveries can be lost or their ledger writes can fail after the
/// order is already paid. The sweeper walks every completed order on an
/// interval and backfills missing or stale audit entries, so the ledger
/// converges on the relational store without manual intervention.
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::audit::{AuditRecordService, SweepReport};
use crate::error::Result;

pub struct BackgroundSweeper {
    audit: Arc<AuditRecordService>,
    interval: Duration,
}

impl BackgroundSweeper {
    pub fn new(audit: Arc<AuditRecordService>, interval: Duration) -> Self {
        Self { audit, interval }
    }

    /// One sweep pass. Also reachable from the CLI and the admin API.
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.audit.process_all_completed_orders().await
    }

    /// Run forever on the configured interval. A failed pass is logged and
    /// the next tick tries again; the loop itself never exits.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "audit sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, retryable = e.is_retryable(), "audit sweep failed");
            }
        }
    }

    /// Spawn the loop on the runtime.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
