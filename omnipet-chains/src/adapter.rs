//! Cross-chain messaging adapter.
//!
//! Dispatch is fire-and-forget: a successful call means "accepted for
//! relay", never "delivered". Delivery detection belongs to the coordinator's
//! timeout machinery, not to this layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::message::{derive_message_id, MessageId, TravelMessage};
use crate::{ChainConfig, ChainError, ChainRegistry};

/// Hand-off seam to a chain's registered connector.
pub trait Connector: Send + Sync {
    /// Connector name, for diagnostics.
    fn name(&self) -> &str;

    /// Accept an encoded payload for relay towards `config.chain_id`.
    fn relay(&self, config: &ChainConfig, payload: &[u8]) -> Result<(), ChainError>;
}

/// Connector that accepts every payload without relaying anything.
///
/// Used in tests and local runs where no real messaging backend exists.
#[derive(Debug, Default)]
pub struct NoopConnector;

impl Connector for NoopConnector {
    fn name(&self) -> &str {
        "noop"
    }

    fn relay(&self, _config: &ChainConfig, _payload: &[u8]) -> Result<(), ChainError> {
        Ok(())
    }
}

/// Adapter that resolves the target chain in the registry and hands the
/// framed message to the registered connector.
pub struct MessagingAdapter {
    registry: ChainRegistry,
    connector: Arc<dyn Connector>,
    nonce: AtomicU64,
}

impl MessagingAdapter {
    pub fn new(registry: ChainRegistry, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            nonce: AtomicU64::new(0),
        }
    }

    /// Registry this adapter resolves chains against.
    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Dispatch a message to `chain_id`.
    ///
    /// Fails with `UnsupportedChain` when the chain is missing or disabled.
    /// On success the returned id identifies this dispatch attempt only;
    /// nothing about delivery is implied.
    pub fn dispatch(
        &self,
        chain_id: u64,
        message: &TravelMessage,
    ) -> Result<MessageId, ChainError> {
        let config = self.registry.get_enabled(chain_id)?;
        let payload = message.encode();
        self.connector.relay(&config, &payload)?;
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        Ok(derive_message_id(chain_id, &payload, nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DeparturePayload;

    fn adapter() -> MessagingAdapter {
        MessagingAdapter::new(ChainRegistry::with_builtin_chains(), Arc::new(NoopConnector))
    }

    fn departure() -> TravelMessage {
        TravelMessage::departure(&DeparturePayload {
            asset_id: 1,
            owner: format!("0x{}", "01".repeat(20)),
            duration_secs: 3600,
            dispatched_at: 1_700_000_000,
        })
        .unwrap()
    }

    #[test]
    fn dispatch_to_known_chain_yields_unique_ids() {
        let adapter = adapter();
        let msg = departure();
        let a = adapter.dispatch(97, &msg).unwrap();
        let b = adapter.dispatch(97, &msg).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn dispatch_to_unknown_or_disabled_chain_fails() {
        let adapter = adapter();
        let msg = departure();
        assert!(matches!(
            adapter.dispatch(424242, &msg),
            Err(ChainError::UnsupportedChain(424242))
        ));

        adapter.registry().set_enabled(97, false).unwrap();
        assert!(matches!(
            adapter.dispatch(97, &msg),
            Err(ChainError::UnsupportedChain(97))
        ));
    }
}
