//! Integration tests for the travel rail HTTP service.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::json;
use tokio::sync::Mutex;

use omnipet_chains::{ChainRegistry, MessagingAdapter, NoopConnector};
use omnipet_coordinator::MirrorStore;
use omnipet_rail::{app_router, AppState};
use omnipet_travel::{provisions, Identity, TravelController, TravelPolicy};

const ASSET: u64 = 5;

fn owner() -> Identity {
    Identity([0x11; 20])
}

fn coordinator() -> Identity {
    Identity([0x22; 20])
}

/// State with one registered asset, no travel yet.
fn idle_state() -> (AppState, Arc<Mutex<TravelController>>) {
    let registry = ChainRegistry::with_builtin_chains();
    let adapter = Arc::new(MessagingAdapter::new(
        registry.clone(),
        Arc::new(NoopConnector),
    ));
    let mut controller = TravelController::new(
        TravelPolicy {
            base_rate_per_hour: 100,
            settlement_fee: 30,
            emergency_fee: 10,
            ..TravelPolicy::default()
        },
        coordinator(),
        Identity([0x33; 20]),
        adapter,
    );
    controller.register_asset(ASSET, owner());
    let controller = Arc::new(Mutex::new(controller));
    let state = AppState::new(
        controller.clone(),
        registry,
        MirrorStore::temporary().unwrap(),
    );
    (state, controller)
}

/// State with one asset already traveling to chain 97.
async fn traveling_state() -> (AppState, Arc<Mutex<TravelController>>) {
    let (state, controller) = idle_state();
    {
        let mut guard = controller.lock().await;
        let (chain, _) = state.registry.get(97).unwrap();
        let deposit = provisions::required_deposit(guard.policy(), 3_600, &chain);
        guard
            .start_travel(owner(), ASSET, 97, 3_600, deposit, 1_700_000_000)
            .unwrap();
    }
    (state, controller)
}

#[tokio::test]
async fn intent_confirm_flow() {
    let (state, _) = idle_state();
    let server = TestServer::new(app_router(state)).unwrap();

    let response = server
        .post("/travel/intent")
        .json(&json!({
            "asset_id": ASSET,
            "target_chain_id": 97,
            "duration_secs": 3600,
            "deposit": 130
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "pending");
    assert!(body["tx_reference"].is_null());

    // A second pending intent for the same asset is refused.
    let response = server
        .post("/travel/intent")
        .json(&json!({
            "asset_id": ASSET,
            "target_chain_id": 97,
            "duration_secs": 3600,
            "deposit": 130
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "INTENT_EXISTS");

    // Confirm with the on-chain tx reference.
    let response = server
        .post(&format!("/travel/intent/{ASSET}/confirm"))
        .json(&json!({"tx_reference": "0xabc123"}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "started");
    assert_eq!(body["tx_reference"], "0xabc123");

    // Confirming twice is refused.
    let response = server
        .post(&format!("/travel/intent/{ASSET}/confirm"))
        .json(&json!({"tx_reference": "0xdef456"}))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "ALREADY_CONFIRMED");
}

#[tokio::test]
async fn confirm_without_intent_is_not_found() {
    let (state, _) = idle_state();
    let server = TestServer::new(app_router(state)).unwrap();

    let response = server
        .post("/travel/intent/42/confirm")
        .json(&json!({"tx_reference": "0xabc"}))
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "INTENT_NOT_FOUND");
}

#[tokio::test]
async fn intent_rejects_disabled_chain() {
    let (state, _) = idle_state();
    state.registry.set_enabled(97, false).unwrap();
    let server = TestServer::new(app_router(state)).unwrap();

    let response = server
        .post("/travel/intent")
        .json(&json!({
            "asset_id": ASSET,
            "target_chain_id": 97,
            "duration_secs": 3600,
            "deposit": 130
        }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "UNSUPPORTED_CHAIN");
}

#[tokio::test]
async fn intent_rejects_traveling_asset() {
    let (state, _) = traveling_state().await;
    let server = TestServer::new(app_router(state)).unwrap();

    let response = server
        .post("/travel/intent")
        .json(&json!({
            "asset_id": ASSET,
            "target_chain_id": 97,
            "duration_secs": 3600,
            "deposit": 130
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "INVALID_STATE");
}

#[tokio::test]
async fn active_travel_view() {
    let (state, _) = traveling_state().await;
    let server = TestServer::new(app_router(state)).unwrap();

    let response = server.get(&format!("/travel/active/{ASSET}")).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["asset_id"], ASSET);
    assert_eq!(body["target_chain_id"], 97);
    assert_eq!(body["status"], "Traveling");

    let response = server.get("/travel/active/42").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "NO_ACTIVE_TRAVEL");
}

#[tokio::test]
async fn active_travel_disappears_after_completion() {
    let (state, controller) = traveling_state().await;
    let server = TestServer::new(app_router(state)).unwrap();

    controller
        .lock()
        .await
        .mark_completed(coordinator(), ASSET, json!({"xp": 70}), 1_700_003_600)
        .unwrap();

    let response = server.get(&format!("/travel/active/{ASSET}")).await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trajectory_append_and_read() {
    let (state, controller) = traveling_state().await;
    let server = TestServer::new(app_router(state)).unwrap();

    let response = server
        .post(&format!("/travel/trajectory/{ASSET}"))
        .json(&json!({"entry": {"place": "BSC Testnet", "note": "arrived"}}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["entries"], 1);

    let response = server.get(&format!("/travel/trajectory/{ASSET}")).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["entry"]["place"], "BSC Testnet");

    // Entries are refused once the travel completed.
    controller
        .lock()
        .await
        .mark_completed(coordinator(), ASSET, json!(null), 1_700_003_600)
        .unwrap();

    let response = server
        .post(&format!("/travel/trajectory/{ASSET}"))
        .json(&json!({"entry": {"note": "late"}}))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error_code"], "INVALID_STATE");

    // The trajectory itself stays readable.
    let response = server.get(&format!("/travel/trajectory/{ASSET}")).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
}
