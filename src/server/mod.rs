/// HTTP surface.
///
/// The server exposes the webhook intake, the public verification endpoint,
/// and a small admin API for sweeps and anchoring. All business logic lives
/// in the services; handlers translate between HTTP and service calls.
pub mod auth;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::anchor::{AnchorOrchestrator, ChainPublisher};
use crate::audit::AuditRecordService;
use crate::error::AuditError;
use crate::state::AnchorStore;
use crate::sweeper::BackgroundSweeper;
use crate::webhook::WebhookReconciler;

/// Shared application state available to all handlers.
pub struct AppState {
    pub audit: Arc<AuditRecordService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub orchestrator: Arc<AnchorOrchestrator>,
    pub publisher: Arc<dyn ChainPublisher>,
    pub anchors: Arc<dyn AnchorStore>,
    pub sweeper: Arc<BackgroundSweeper>,
    /// Bearer token for the admin endpoints.
    pub admin_token: String,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::public_routes())
        .merge(routes::admin_routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server.
pub async fn serve(state: Arc<AppState>, addr: &str) -> crate::error::Result<()> {
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AuditError::Io)?;

    tracing::info!("ordertrail API server listening on {addr}");

    axum::serve(listener, app).await.map_err(AuditError::Io)?;

    Ok(())
}
