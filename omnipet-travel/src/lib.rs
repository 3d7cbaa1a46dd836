//! omnipet-travel
//!
//! The authoritative travel state machine for tokenized pet assets, plus the
//! provisions accounting that funds each round trip. One [`TravelController`]
//! instance holds the home-chain truth: per-asset status, at most one active
//! [`TravelRecord`] per asset, escrowed provisions, cooldowns and the timeout
//! safety net. Everything downstream (coordinator, mirror, HTTP surface)
//! derives from this crate's state.

use thiserror::Error;

pub mod controller;
pub mod provisions;
pub mod state;

pub use controller::TravelController;
pub use state::{
    AssetStatus, FeePolicy, Identity, ProvisionsEscrow, TravelEvent, TravelPolicy, TravelRecord,
    TravelStatus,
};

use omnipet_chains::ChainError;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum TravelError {
    #[error("operation illegal for current travel status {status:?}")]
    InvalidState { status: TravelStatus },

    #[error("caller lacks the required identity for this operation")]
    Unauthorized,

    #[error("unknown asset: {0}")]
    UnknownAsset(u64),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("insufficient provisions: required {required}, provided {provided}")]
    InsufficientProvisions { required: u128, provided: u128 },

    #[error("cooldown active until {until}")]
    CooldownActive { until: u64 },

    #[error("duration {duration_secs}s outside allowed range [{min}s, {max}s]")]
    InvalidDuration {
        duration_secs: u64,
        min: u64,
        max: u64,
    },

    #[error("emergency return not yet eligible, safety window opens at {eligible_at}")]
    NotYetEligible { eligible_at: u64 },

    #[error("dispatch accepted for relay but no arrival acknowledgement observed")]
    DeliveryUnconfirmed,

    #[error("operation rate limited, next allowed at {next_allowed_at}")]
    RateLimited { next_allowed_at: u64 },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl TravelError {
    /// Fold adapter-level chain errors into the travel taxonomy.
    pub(crate) fn from_chain(err: ChainError) -> Self {
        match err {
            ChainError::UnsupportedChain(id) => Self::UnsupportedChain(id),
            other => Self::Chain(other),
        }
    }
}
