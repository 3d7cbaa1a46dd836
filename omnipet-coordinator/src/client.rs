//! Controller client seam.
//!
//! The coordinator talks to the travel controller through this trait so the
//! same service loop works against an in-process controller (local runs,
//! tests) or a remote deployment behind an RPC transport.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use omnipet_travel::{Identity, TravelController, TravelError, TravelRecord};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Travel(#[from] TravelError),

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Identity the controller accepts coordinator calls from.
    async fn authorized_coordinator(&self) -> Result<Identity, ClientError>;

    /// Snapshot of every record whose travel is still in flight.
    async fn active_travels(&self) -> Result<Vec<TravelRecord>, ClientError>;

    /// Latest record for one asset, when any exists.
    async fn travel_record(&self, asset_id: u64) -> Result<Option<TravelRecord>, ClientError>;

    /// Complete a travel with the given outcome; returns the refunded amount.
    async fn mark_completed(
        &self,
        asset_id: u64,
        outcome: serde_json::Value,
        now: u64,
    ) -> Result<u128, ClientError>;

    /// Force an overdue travel home; returns the refunded amount.
    async fn emergency_return(&self, asset_id: u64, now: u64) -> Result<u128, ClientError>;

    /// Report a travel as failed; returns the refunded amount.
    async fn mark_failed(
        &self,
        asset_id: u64,
        reason: &str,
        now: u64,
    ) -> Result<u128, ClientError>;
}

/// Client backed by a shared in-process controller.
#[derive(Clone)]
pub struct InProcessClient {
    controller: Arc<Mutex<TravelController>>,
    identity: Identity,
}

impl InProcessClient {
    pub fn new(controller: Arc<Mutex<TravelController>>, identity: Identity) -> Self {
        Self {
            controller,
            identity,
        }
    }
}

#[async_trait]
impl ControllerClient for InProcessClient {
    async fn authorized_coordinator(&self) -> Result<Identity, ClientError> {
        Ok(self.controller.lock().await.authorized_coordinator())
    }

    async fn active_travels(&self) -> Result<Vec<TravelRecord>, ClientError> {
        Ok(self.controller.lock().await.active_records())
    }

    async fn travel_record(&self, asset_id: u64) -> Result<Option<TravelRecord>, ClientError> {
        Ok(self.controller.lock().await.travel_record(asset_id).cloned())
    }

    async fn mark_completed(
        &self,
        asset_id: u64,
        outcome: serde_json::Value,
        now: u64,
    ) -> Result<u128, ClientError> {
        let mut controller = self.controller.lock().await;
        Ok(controller.mark_completed(self.identity, asset_id, outcome, now)?)
    }

    async fn emergency_return(&self, asset_id: u64, now: u64) -> Result<u128, ClientError> {
        let mut controller = self.controller.lock().await;
        Ok(controller.emergency_return(self.identity, asset_id, now)?)
    }

    async fn mark_failed(
        &self,
        asset_id: u64,
        reason: &str,
        now: u64,
    ) -> Result<u128, ClientError> {
        let mut controller = self.controller.lock().await;
        Ok(controller.mark_failed(self.identity, asset_id, reason, now)?)
    }
}
