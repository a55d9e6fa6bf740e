/// REST API routes.
///
/// Public surface: webhook intake and order verification. Admin surface
/// (bearer-token guarded): sweeps, anchoring, contract deploy. Handlers
/// never hold business logic; they call the services and translate errors
/// into status codes.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::auth::{AdminToken, ErrorResponse};
use super::AppState;
use crate::anchor::CycleOutcome;
use crate::error::AuditError;
use crate::webhook::{WebhookDelivery, WebhookOutcome};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: AuditError) -> ApiError {
    let status = match &e {
        AuditError::Validation(_) => StatusCode::BAD_REQUEST,
        AuditError::NotFound(_) => StatusCode::NOT_FOUND,
        AuditError::Conflict(_) | AuditError::CycleInProgress => StatusCode::CONFLICT,
        AuditError::Unavailable(_) | AuditError::InsufficientFunds(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ─── Health ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ledger_connected: bool,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ledger_connected: state.audit.ledger().is_connected().await,
    })
}

// ─── Webhook intake ──────────────────────────────────────

#[derive(Serialize)]
struct WebhookResponse {
    outcome: &'static str,
}

/// POST /api/webhook — payment-provider callback.
///
/// The body is read raw and parsed here so a malformed delivery gets a 400
/// with a reason instead of a framework rejection.
async fn webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let delivery: WebhookDelivery = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("malformed webhook body: {e}"),
            }),
        )
    })?;

    match state.reconciler.handle(&delivery).await {
        Ok(WebhookOutcome::Processed) => Ok(Json(WebhookResponse {
            outcome: "processed",
        })),
        Ok(WebhookOutcome::AlreadyProcessed) => Ok(Json(WebhookResponse {
            outcome: "duplicate",
        })),
        Ok(WebhookOutcome::Deferred) => Ok(Json(WebhookResponse {
            outcome: "deferred",
        })),
        Ok(WebhookOutcome::Rejected(reason)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: reason }),
        )),
        Err(e) => Err(error_response(e)),
    }
}

// ─── Verification ────────────────────────────────────────

/// GET /api/orders/{id}/verify
///
/// Mismatches answer 200 with `is_valid: false` and both digests; only an
/// unknown order or an unreachable ledger is an error status.
async fn verify_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> Result<Json<crate::audit::VerificationReport>, ApiError> {
    state
        .audit
        .verify_order(order_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhook", post(webhook))
        .route("/api/orders/:order_id/verify", get(verify_order))
}

// ─── Admin: sweep ────────────────────────────────────────

/// POST /api/audit/sweep — run the audit sweep now.
async fn run_sweep(
    _admin: AdminToken,
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::audit::SweepReport>, ApiError> {
    state
        .sweeper
        .run_once()
        .await
        .map(Json)
        .map_err(error_response)
}

// ─── Admin: anchoring ────────────────────────────────────

#[derive(Serialize)]
struct AnchorListResponse {
    anchors: Vec<crate::state::models::AnchorRecord>,
    wallet: crate::anchor::WalletInfo,
}

/// GET /api/anchors — confirmed anchors plus publishing-wallet status.
async fn list_anchors(
    _admin: AdminToken,
    State(state): State<Arc<AppState>>,
) -> Result<Json<AnchorListResponse>, ApiError> {
    let anchors = state
        .anchors
        .list_anchors()
        .await
        .map_err(error_response)?;
    let wallet = state.publisher.wallet_info().await.map_err(error_response)?;
    Ok(Json(AnchorListResponse { anchors, wallet }))
}

#[derive(Serialize)]
struct AnchorCycleResponse {
    anchored: bool,
    record: Option<crate::state::models::AnchorRecord>,
}

/// POST /api/anchors — trigger one anchoring cycle.
///
/// 409 when a cycle is already running; the caller retries later rather
/// than queueing behind an in-flight cycle.
async fn trigger_anchor(
    _admin: AdminToken,
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<AnchorCycleResponse>), ApiError> {
    match state.orchestrator.run_cycle().await {
        Ok(CycleOutcome::NoCandidates) => Ok((
            StatusCode::OK,
            Json(AnchorCycleResponse {
                anchored: false,
                record: None,
            }),
        )),
        Ok(CycleOutcome::Anchored(record)) => Ok((
            StatusCode::CREATED,
            Json(AnchorCycleResponse {
                anchored: true,
                record: Some(record),
            }),
        )),
        Err(e) => Err(error_response(e)),
    }
}

#[derive(Serialize)]
struct DeployResponse {
    contract_address: String,
}

/// POST /api/anchors/contract — one-time anchor contract deploy.
async fn deploy_contract(
    _admin: AdminToken,
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<DeployResponse>), ApiError> {
    let contract_address = state
        .publisher
        .deploy_contract()
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(DeployResponse { contract_address }),
    ))
}

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/audit/sweep", post(run_sweep))
        .route("/api/anchors", get(list_anchors).post(trigger_anchor))
        .route("/api/anchors/contract", post(deploy_contract))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (AuditError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AuditError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AuditError::Conflict("x".into()), StatusCode::CONFLICT),
            (AuditError::CycleInProgress, StatusCode::CONFLICT),
            (
                AuditError::Unavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AuditError::InsufficientFunds("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AuditError::Serialization("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).0, expected);
        }
    }
}
