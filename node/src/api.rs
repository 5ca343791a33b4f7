//! # Status API
//!
//! Read-only HTTP interface of the node. It never returns a balance,
//! encrypted or otherwise. Vault state changes go through the engine, not
//! through here.
//!
//! ## Endpoints
//!
//! | Method | Path           | Description                               |
//! |--------|----------------|-------------------------------------------|
//! | GET    | `/health`      | Liveness probe                            |
//! | GET    | `/status`      | Engine summary: vault counts, epoch, etc. |
//! | GET    | `/vaults/:id`  | Status of one vault                       |
//! | GET    | `/review`      | Vaults flagged for operator review        |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use shieldmint_protocol::error::{StateError, VaultError};
use shieldmint_protocol::ledger::{StatusCounts, VaultLedger};
use shieldmint_protocol::monitor::{LiquidationMonitor, ReviewFlag};
use shieldmint_protocol::types::VaultId;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub network: String,
    pub ledger: Arc<VaultLedger>,
    pub monitor: Arc<LiquidationMonitor>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/vaults/:id", get(vault_handler))
        .route("/review", get(review_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    pub stablecoin: String,
    pub vaults: StatusCounts,
    pub binding_epoch: u64,
    pub consumed_proofs: usize,
    pub review_queue: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Liveness only.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let verifier = state.ledger.verifier();
    Json(StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        stablecoin: shieldmint_protocol::config::STABLECOIN_SYMBOL.to_string(),
        vaults: state.ledger.status_counts(),
        binding_epoch: verifier.epoch(),
        consumed_proofs: verifier.registry().len(),
        review_queue: state.monitor.review_queue().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /vaults/:id`. Status and timestamps, no balances.
async fn vault_handler(Path(id): Path<u64>, State(state): State<AppState>) -> impl IntoResponse {
    match state.ledger.vault_status(VaultId(id)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(VaultError::State(StateError::VaultNotFound(_))) => error(
            StatusCode::NOT_FOUND,
            format!("vault {id} not found"),
        ),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn review_handler(State(state): State<AppState>) -> Json<Vec<ReviewFlag>> {
    Json(state.monitor.review_queue())
}

fn error(status: StatusCode, message: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use shieldmint_protocol::cipher::fixed_point::{price_units, units};
    use shieldmint_protocol::clock::{Clock, ManualClock};
    use shieldmint_protocol::config::EngineConfig;
    use shieldmint_protocol::engine::{Engine, EngineKeys};
    use shieldmint_protocol::ledger::NoopSettlement;
    use shieldmint_protocol::proof::{ProofContext, Statement};
    use shieldmint_protocol::storage::VaultDB;
    use shieldmint_protocol::types::{AssetId, OperationKind, OwnerId};
    use tower::ServiceExt;

    fn test_engine() -> Engine {
        let clock = ManualClock::starting_now();
        let engine = Engine::assemble(
            &EngineConfig::default(),
            EngineKeys::generate(),
            VaultDB::open_temporary().expect("temp db"),
            clock.clone(),
            Arc::new(NoopSettlement),
        )
        .expect("engine");
        engine
            .feed
            .set_price(AssetId::default(), price_units(3000).unwrap(), clock.now());
        engine
    }

    fn test_router(engine: &Engine) -> Router {
        let monitor = Arc::new(LiquidationMonitor::new(
            Arc::clone(&engine.ledger),
            EngineConfig::default().monitor,
            Arc::clone(&engine.clock),
        ));
        create_router(AppState {
            version: "0.1.0-test".into(),
            network: "devnet".into(),
            ledger: Arc::clone(&engine.ledger),
            monitor,
        })
    }

    async fn open_vault(engine: &Engine) -> VaultId {
        let owner = OwnerId::new("alice");
        let (ct, proof) = engine
            .seal_input(
                units(1).unwrap(),
                &Statement::RangeBound(engine.ledger.risk().max_deposit),
                ProofContext::new(owner.clone(), OperationKind::CreateVault, None),
            )
            .unwrap();
        engine.ledger.create_vault(owner, None, ct, &proof).await.unwrap()
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let engine = test_engine();
        let (status, body) = get(&test_router(&engine), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_counts_vaults() {
        let engine = test_engine();
        open_vault(&engine).await;
        open_vault(&engine).await;
        let (status, body) = get(&test_router(&engine), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vaults"]["active"], 2);
        assert_eq!(body["consumed_proofs"], 2);
        assert_eq!(body["stablecoin"], "FUSD");
    }

    #[tokio::test]
    async fn vault_endpoint_reports_status_without_balances() {
        let engine = test_engine();
        let id = open_vault(&engine).await;
        let (status, body) = get(&test_router(&engine), &format!("/vaults/{}", id.0)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["owner"], "alice");
        assert!(body.get("collateral").is_none());
        assert!(body.get("debt").is_none());
    }

    #[tokio::test]
    async fn unknown_vault_is_404() {
        let engine = test_engine();
        let (status, body) = get(&test_router(&engine), "/vaults/77").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("77"));
    }

    #[tokio::test]
    async fn review_queue_starts_empty() {
        let engine = test_engine();
        let (status, body) = get(&test_router(&engine), "/review").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
