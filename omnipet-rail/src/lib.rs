//! omnipet-rail
//!
//! Axum-based HTTP service in front of the travel controller. Presentation
//! layers talk to this rail to record travel intents before the on-chain
//! call, attach the transaction reference once the travel started, read the
//! active travel for an asset, and append opaque trajectory entries while a
//! pet is abroad.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use omnipet_chains::{ChainRegistry, MessagingAdapter, NoopConnector, HOME_CHAIN_ID};
use omnipet_coordinator::MirrorStore;
use omnipet_travel::{Identity, TravelController, TravelPolicy, TravelRecord, TravelStatus};

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

const COORDINATOR_IDENTITY_ENV: &str = "OMNIPET_COORDINATOR_IDENTITY";
const ADMIN_IDENTITY_ENV: &str = "OMNIPET_ADMIN_IDENTITY";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Intent lifecycle: recorded locally, then confirmed with a tx reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Started,
}

/// Pending local entry recorded before the on-chain travel call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelIntent {
    pub asset_id: u64,
    pub target_chain_id: u64,
    pub duration_secs: u64,
    pub deposit: u128,
    pub status: IntentStatus,
    /// On-chain transaction reference, attached at confirmation.
    pub tx_reference: Option<String>,
    pub created_at: u64,
    pub confirmed_at: Option<u64>,
}

/// Opaque timestamped trajectory entry, produced by collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryEntry {
    pub at: u64,
    pub entry: serde_json::Value,
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Shared travel controller (home-chain truth).
    pub controller: Arc<Mutex<TravelController>>,
    /// Chain registry the controller dispatches against.
    pub registry: ChainRegistry,
    /// Local mirror, kept fresh by the coordinator.
    pub mirror: MirrorStore,
    /// Travel intents keyed by asset id.
    pub intents: Arc<RwLock<HashMap<u64, TravelIntent>>>,
    /// Trajectory entries keyed by asset id, append-only.
    pub trajectories: Arc<RwLock<HashMap<u64, Vec<TrajectoryEntry>>>>,
}

impl AppState {
    pub fn new(
        controller: Arc<Mutex<TravelController>>,
        registry: ChainRegistry,
        mirror: MirrorStore,
    ) -> Self {
        Self {
            controller,
            registry,
            mirror,
            intents: Arc::new(RwLock::new(HashMap::new())),
            trajectories: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the router
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health))
        .route("/travel/info", get(info))
        .route("/travel/chains", get(list_chains))
        // Intents
        .route("/travel/intent", post(create_intent))
        .route("/travel/intent/:asset/confirm", post(confirm_intent))
        // Queries
        .route("/travel/active/:asset", get(get_active_travel))
        // Trajectory
        .route(
            "/travel/trajectory/:asset",
            get(get_trajectory).post(append_trajectory),
        )
        .layer(cors)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - HEALTH & INFO
// ═══════════════════════════════════════════════════════════════════════════════

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "omnipet-rail"
    }))
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let controller = state.controller.lock().await;
    let policy = controller.policy().clone();
    drop(controller);

    Json(serde_json::json!({
        "home_chain_id": HOME_CHAIN_ID,
        "chains": state.registry.snapshot().len(),
        "registry_version": state.registry.version(),
        "policy": policy,
    }))
}

async fn list_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": state.registry.version(),
        "chains": state.registry.snapshot(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - INTENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub asset_id: u64,
    pub target_chain_id: u64,
    pub duration_secs: u64,
    pub deposit: u128,
}

async fn create_intent(
    State(state): State<AppState>,
    Json(req): Json<CreateIntentRequest>,
) -> Result<Json<TravelIntent>, ApiError> {
    if state.registry.get_enabled(req.target_chain_id).is_err() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: format!("chain {} is unknown or disabled", req.target_chain_id),
            code: "UNSUPPORTED_CHAIN".into(),
        });
    }

    let now = unix_now();
    let controller = state.controller.lock().await;
    if !controller.can_start_travel(req.asset_id, now) {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            message: format!("asset {} cannot start a travel now", req.asset_id),
            code: "INVALID_STATE".into(),
        });
    }
    drop(controller);

    let mut intents = state.intents.write().await;
    if let Some(existing) = intents.get(&req.asset_id) {
        if existing.status == IntentStatus::Pending {
            return Err(ApiError {
                status: StatusCode::CONFLICT,
                message: format!("asset {} already has a pending intent", req.asset_id),
                code: "INTENT_EXISTS".into(),
            });
        }
    }

    let intent = TravelIntent {
        asset_id: req.asset_id,
        target_chain_id: req.target_chain_id,
        duration_secs: req.duration_secs,
        deposit: req.deposit,
        status: IntentStatus::Pending,
        tx_reference: None,
        created_at: now,
        confirmed_at: None,
    };
    intents.insert(req.asset_id, intent.clone());

    Ok(Json(intent))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmIntentRequest {
    pub tx_reference: String,
}

async fn confirm_intent(
    State(state): State<AppState>,
    Path(asset_id): Path<u64>,
    Json(req): Json<ConfirmIntentRequest>,
) -> Result<Json<TravelIntent>, ApiError> {
    let mut intents = state.intents.write().await;
    let intent = intents.get_mut(&asset_id).ok_or_else(|| ApiError {
        status: StatusCode::NOT_FOUND,
        message: format!("no intent recorded for asset {}", asset_id),
        code: "INTENT_NOT_FOUND".into(),
    })?;

    if intent.status == IntentStatus::Started {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            message: format!("intent for asset {} is already confirmed", asset_id),
            code: "ALREADY_CONFIRMED".into(),
        });
    }

    intent.status = IntentStatus::Started;
    intent.tx_reference = Some(req.tx_reference);
    intent.confirmed_at = Some(unix_now());

    Ok(Json(intent.clone()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

async fn get_active_travel(
    State(state): State<AppState>,
    Path(asset_id): Path<u64>,
) -> Result<Json<TravelRecord>, ApiError> {
    // Mirror first; the coordinator keeps it fresh. Fall back to the
    // controller for records the mirror has not seen yet.
    if let Ok(Some(entry)) = state.mirror.get(asset_id) {
        if entry.record.status.is_active() {
            return Ok(Json(entry.record));
        }
    }

    let controller = state.controller.lock().await;
    match controller.travel_record(asset_id) {
        Some(record) if record.status.is_active() => Ok(Json(record.clone())),
        _ => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("asset {} has no active travel", asset_id),
            code: "NO_ACTIVE_TRAVEL".into(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - TRAJECTORY
// ═══════════════════════════════════════════════════════════════════════════════

async fn get_trajectory(
    State(state): State<AppState>,
    Path(asset_id): Path<u64>,
) -> impl IntoResponse {
    let trajectories = state.trajectories.read().await;
    let entries = trajectories.get(&asset_id).cloned().unwrap_or_default();
    Json(serde_json::json!({
        "asset_id": asset_id,
        "entries": entries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AppendTrajectoryRequest {
    pub entry: serde_json::Value,
}

async fn append_trajectory(
    State(state): State<AppState>,
    Path(asset_id): Path<u64>,
    Json(req): Json<AppendTrajectoryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Entries are only accepted while the pet is actually abroad.
    let controller = state.controller.lock().await;
    let status = controller
        .travel_record(asset_id)
        .map(|r| r.status)
        .unwrap_or(TravelStatus::None);
    drop(controller);

    if !matches!(status, TravelStatus::Traveling | TravelStatus::OnTargetChain) {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            message: format!(
                "asset {} is not traveling (status {:?})",
                asset_id, status
            ),
            code: "INVALID_STATE".into(),
        });
    }

    let mut trajectories = state.trajectories.write().await;
    let entries = trajectories.entry(asset_id).or_default();
    entries.push(TrajectoryEntry {
        at: unix_now(),
        entry: req.entry,
    });

    Ok(Json(serde_json::json!({
        "asset_id": asset_id,
        "entries": entries.len(),
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "error_code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Resolve an identity from the environment. A missing variable falls back
/// to the development default with a warning; a variable that is set but
/// malformed is a configuration error, never silently defaulted.
fn identity_from_env(var: &str, fallback: [u8; 20]) -> Result<Identity, String> {
    match env::var(var) {
        Ok(value) => Identity::from_hex(&value)
            .map_err(|err| format!("{var} is not a valid 20-byte hex identity: {err}")),
        Err(_) => {
            tracing::warn!("{} not set, using development default identity", var);
            Ok(Identity(fallback))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub mod main_entry {
    use super::*;
    use std::net::SocketAddr;

    pub async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "omnipet_rail=info".into()),
            )
            .init();

        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3001);

        let registry = ChainRegistry::with_builtin_chains();
        let adapter = Arc::new(MessagingAdapter::new(
            registry.clone(),
            Arc::new(NoopConnector),
        ));
        let coordinator = identity_from_env(COORDINATOR_IDENTITY_ENV, [0x22; 20])?;
        let admin = identity_from_env(ADMIN_IDENTITY_ENV, [0x33; 20])?;
        let controller = Arc::new(Mutex::new(TravelController::new(
            TravelPolicy::default(),
            coordinator,
            admin,
            adapter,
        )));
        let mirror = MirrorStore::temporary()?;
        let state = AppState::new(controller, registry, mirror);

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("omnipet rail listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app_router(state)).await?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;

    fn test_state() -> AppState {
        let registry = ChainRegistry::with_builtin_chains();
        let adapter = Arc::new(MessagingAdapter::new(
            registry.clone(),
            Arc::new(NoopConnector),
        ));
        let controller = Arc::new(Mutex::new(TravelController::new(
            TravelPolicy::default(),
            Identity([0x22; 20]),
            Identity([0x33; 20]),
            adapter,
        )));
        AppState::new(controller, registry, MirrorStore::temporary().unwrap())
    }

    #[test]
    fn identity_env_resolution() {
        // Unset: development default.
        assert_eq!(
            identity_from_env("OMNIPET_TEST_IDENTITY_UNSET", [0x22; 20]).unwrap(),
            Identity([0x22; 20])
        );

        // Set and valid: parsed value wins over the fallback.
        env::set_var("OMNIPET_TEST_IDENTITY_GOOD", format!("0x{}", "44".repeat(20)));
        assert_eq!(
            identity_from_env("OMNIPET_TEST_IDENTITY_GOOD", [0x22; 20]).unwrap(),
            Identity([0x44; 20])
        );
        env::remove_var("OMNIPET_TEST_IDENTITY_GOOD");

        // Set but malformed: configuration error, no silent fallback.
        env::set_var("OMNIPET_TEST_IDENTITY_BAD", "not-hex");
        assert!(identity_from_env("OMNIPET_TEST_IDENTITY_BAD", [0x22; 20]).is_err());
        env::remove_var("OMNIPET_TEST_IDENTITY_BAD");
    }

    #[tokio::test]
    async fn test_health() {
        let server = TestServer::new(app_router(test_state())).unwrap();
        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_reports_home_chain() {
        let server = TestServer::new(app_router(test_state())).unwrap();
        let response = server.get("/travel/info").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["home_chain_id"], HOME_CHAIN_ID);
        assert!(body["policy"]["cooldown_secs"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_chains_snapshot() {
        let server = TestServer::new(app_router(test_state())).unwrap();
        let response = server.get("/travel/chains").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        let chains = body["chains"].as_array().unwrap();
        assert!(chains.iter().any(|c| c["chain_id"] == 97));
    }
}
