use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ordertrail::anchor::{AnchorOrchestrator, ChainPublisher, EthereumPublisher};
use ordertrail::audit::AuditRecordService;
use ordertrail::config::Config;
use ordertrail::error::Result;
use ordertrail::ledger::{AuditLedger, ImmudbLedger};
use ordertrail::notify::{AnchorNotifier, HttpNotifier, LogNotifier};
use ordertrail::server::{self, AppState};
use ordertrail::state::{AnchorStore, Database, PgStore};
use ordertrail::sweeper::BackgroundSweeper;
use ordertrail::webhook::WebhookReconciler;

#[derive(Parser)]
#[command(name = "ordertrail")]
#[command(about = "Tamper-evident audit trail and Merkle anchoring for marketplace transactions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server with the background sweeper
    Serve,
    /// Run one audit sweep and exit
    Sweep,
    /// Run one anchoring cycle and exit
    Anchor,
    /// Verify one order's audit entry
    Verify {
        /// Internal order id
        order_id: i64,
    },
    /// Deploy the anchor contract (one-time setup)
    DeployContract,
}

/// Everything the subcommands share, wired from configuration.
struct Services {
    config: Config,
    store: Arc<PgStore>,
    audit: Arc<AuditRecordService>,
    publisher: Arc<dyn ChainPublisher>,
    orchestrator: Arc<AnchorOrchestrator>,
}

async fn bootstrap() -> Result<Services> {
    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    let store = Arc::new(PgStore::new(db));

    let ledger: Arc<dyn AuditLedger> = Arc::new(ImmudbLedger::new(config.ledger.clone()));
    let audit = Arc::new(AuditRecordService::new(ledger.clone(), store.clone()));

    let publisher: Arc<dyn ChainPublisher> =
        Arc::new(EthereumPublisher::new(config.chain.clone()));
    let notifier: Arc<dyn AnchorNotifier> = match &config.notify_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    let orchestrator = Arc::new(AnchorOrchestrator::new(
        ledger,
        store.clone() as Arc<dyn AnchorStore>,
        publisher.clone(),
        notifier,
    ));

    Ok(Services {
        config,
        store,
        audit,
        publisher,
        orchestrator,
    })
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let services = bootstrap().await?;

    match cli.command {
        Commands::Serve => {
            let sweeper = Arc::new(BackgroundSweeper::new(
                services.audit.clone(),
                Duration::from_secs(services.config.sweep_interval_secs),
            ));
            sweeper.clone().spawn();

            let reconciler = Arc::new(WebhookReconciler::new(
                services.store.clone(),
                services.store.clone(),
                services.audit.clone(),
                services.config.webhook_secret.clone(),
            ));

            let state = Arc::new(AppState {
                audit: services.audit,
                reconciler,
                orchestrator: services.orchestrator,
                publisher: services.publisher,
                anchors: services.store,
                sweeper,
                admin_token: services.config.admin_token.clone(),
            });
            let addr = format!("0.0.0.0:{}", services.config.http_port);
            server::serve(state, &addr).await
        }
        Commands::Sweep => {
            let report = services.audit.process_all_completed_orders().await?;
            println!(
                "sweep complete: checked={} stored={} skipped={} failed={}",
                report.checked, report.stored, report.skipped, report.failed
            );
            Ok(())
        }
        Commands::Anchor => {
            match services.orchestrator.run_cycle().await? {
                ordertrail::anchor::CycleOutcome::NoCandidates => {
                    println!("nothing to anchor");
                }
                ordertrail::anchor::CycleOutcome::Anchored(record) => {
                    println!(
                        "anchored {} orders: root={} tx={} block={}",
                        record.order_count, record.root_digest, record.tx_hash, record.block_number
                    );
                }
            }
            Ok(())
        }
        Commands::Verify { order_id } => {
            let report = services.audit.verify_order(order_id).await?;
            println!(
                "order {}: valid={} stored={} computed={}",
                report.order_id,
                report.is_valid,
                report.stored_digest.as_deref().unwrap_or("<missing>"),
                report.computed_digest
            );
            Ok(())
        }
        Commands::DeployContract => {
            let address = services.publisher.deploy_contract().await?;
            println!("anchor contract deployed at {address}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "ordertrail exited with an error");
        std::process::exit(1);
    }
}
