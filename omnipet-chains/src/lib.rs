//! omnipet-chains
//!
//! Chain connector registry and cross-chain messaging adapter for the
//! omnipet travel system. This crate defines the per-target-chain
//! configuration records, a versioned registry with atomic snapshot reads,
//! the wire codec for travel messages, and the dispatch seam through which
//! the travel controller hands a message to a chain's registered connector.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod adapter;
pub mod message;
pub mod registry;

pub use adapter::{Connector, MessagingAdapter, NoopConnector};
pub use message::{DeparturePayload, MessageId, MessageType, ReturnPayload, TravelMessage};
pub use registry::ChainRegistry;

/// Chain id of the home chain, where the travel controller lives.
pub const HOME_CHAIN_ID: u64 = 7001;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("connector dispatch error: {0}")]
    Dispatch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-target-chain configuration record.
///
/// Written by an administrative authority, read by the travel controller and
/// the coordinator. The `connector` field is an opaque routing descriptor;
/// the controller never interprets it, it is handed verbatim to the
/// registered [`Connector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Numeric chain id (EVM convention).
    pub chain_id: u64,
    /// Human-readable chain name.
    pub display_name: String,
    /// Opaque connector routing descriptor (e.g. a contract address).
    pub connector: String,
    /// Settlement token used to pay cross-chain gas on this route.
    pub settlement_token: String,
    /// Fixed cross-chain settlement surcharge, in base units of the deposit.
    pub settlement_surcharge: u128,
    /// Whether travel to this chain is currently enabled.
    pub enabled: bool,
}

impl ChainConfig {
    pub fn new(
        chain_id: u64,
        display_name: &str,
        connector: &str,
        settlement_token: &str,
        settlement_surcharge: u128,
    ) -> Self {
        Self {
            chain_id,
            display_name: display_name.to_string(),
            connector: connector.to_string(),
            settlement_token: settlement_token.to_string(),
            settlement_surcharge,
            enabled: true,
        }
    }
}

/// Built-in configurations for the chains the system ships with.
///
/// Production deployments overwrite these through the admin surface; they are
/// never silently relied on there.
pub fn builtin_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig::new(
            97,
            "BSC Testnet",
            "0x1cBD20108cb166D45B32c6D3eCAD551c8d03eAD1",
            "tBNB",
            20_000_000_000_000_000,
        ),
        ChainConfig::new(
            11155111,
            "ETH Sepolia",
            "0xBfE0D6341E52345d5384D3DD4f106464A377D241",
            "sETH",
            30_000_000_000_000_000,
        ),
    ]
}
