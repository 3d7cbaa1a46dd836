//! Travel state types: asset and travel statuses, records, escrow, policy
//! and the append-only event history.

use serde::{Deserialize, Serialize};

use omnipet_chains::MessageId;

/// 20-byte caller identity (owner, coordinator or admin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(#[serde(with = "serde_hex20")] pub [u8; 20]);

impl Identity {
    /// Parse from a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Asset status as seen by the home chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    Idle,
    Traveling,
    /// Locked on the home chain while a cross-chain trip is in flight.
    Locked,
}

/// Travel record status. Discriminants match the original wire ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TravelStatus {
    None = 0,
    Locked = 1,
    Traveling = 2,
    OnTargetChain = 3,
    Returning = 4,
    Completed = 5,
    Failed = 6,
    Timeout = 7,
}

impl TravelStatus {
    /// Terminal statuses can only be exited by a fresh travel or an
    /// administrative clear.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Active means a trip is in flight: outside {None, Completed, Failed,
    /// Timeout}. At most one active record may exist per asset.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            Self::None | Self::Completed | Self::Failed | Self::Timeout
        )
    }

    /// Pre-crossing statuses, the only window in which cancellation is
    /// offered. Once the target chain acknowledged arrival the message
    /// cannot be retracted.
    pub fn is_pre_crossing(self) -> bool {
        matches!(self, Self::Locked | Self::Traveling)
    }
}

/// Provisions escrowed for one travel.
///
/// Terminal invariant: `deposited == refunded + consumed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionsEscrow {
    pub deposited: u128,
    pub consumed: u128,
    pub refunded: u128,
}

impl ProvisionsEscrow {
    pub fn new(deposited: u128) -> Self {
        Self {
            deposited,
            consumed: 0,
            refunded: 0,
        }
    }

    /// Remainder still held in escrow.
    pub fn remaining(&self) -> u128 {
        self.deposited
            .saturating_sub(self.consumed)
            .saturating_sub(self.refunded)
    }
}

/// Per-asset travel record. At most one active instance per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelRecord {
    pub asset_id: u64,
    pub owner: Identity,
    pub target_chain_id: u64,
    /// Unix seconds at which the travel started.
    pub start_time: u64,
    /// Maximum requested duration in seconds.
    pub max_duration_secs: u64,
    pub escrow: ProvisionsEscrow,
    pub status: TravelStatus,
    #[serde(with = "serde_hex32_opt")]
    pub outbound_message_id: Option<MessageId>,
    #[serde(with = "serde_hex32_opt")]
    pub return_message_id: Option<MessageId>,
    /// Unix seconds at which the record reached a terminal status.
    pub completed_at: Option<u64>,
}

impl TravelRecord {
    /// When the record becomes eligible for emergency return.
    pub fn emergency_eligible_at(&self, safety_multiplier: u32) -> u64 {
        self.start_time + u64::from(safety_multiplier) * self.max_duration_secs
    }

    /// When the requested duration elapses.
    pub fn due_at(&self) -> u64 {
        self.start_time + self.max_duration_secs
    }

    /// A record past its due time that never acknowledged arrival gives no
    /// evidence the departure message was ever delivered. The connector only
    /// promises accepted-for-relay; liveness comes from the timeout safety
    /// net, this check merely names the condition.
    pub fn check_delivery(&self, now: u64) -> Result<(), crate::TravelError> {
        if self.status.is_pre_crossing() && now >= self.due_at() {
            return Err(crate::TravelError::DeliveryUnconfirmed);
        }
        Ok(())
    }
}

/// How the consumed settlement cost is estimated at completion time.
///
/// `Flat` charges the policy's fixed estimate regardless of actual duration
/// (the default: no gas telemetry is required from the remote chain).
/// `Metered` charges per started hour of elapsed travel; whether to meter is
/// a deployment policy decision, not a code path distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeePolicy {
    Flat,
    Metered { rate_per_hour: u128 },
}

/// Administrator-set travel policy. Every field is explicit; production
/// configuration never relies on these defaults silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelPolicy {
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    pub cooldown_secs: u64,
    /// Safety multiplier `k`: emergency return unlocks at
    /// `start + k * max_duration`.
    pub safety_multiplier: u32,
    /// Provisions base rate per travel hour, in base units.
    pub base_rate_per_hour: u128,
    /// Flat settlement-fee estimate consumed on normal completion.
    pub settlement_fee: u128,
    /// Minimal settlement fee retained on emergency return.
    pub emergency_fee: u128,
    pub fee_policy: FeePolicy,
    /// Minimum interval between administrative stuck-travel clears.
    pub clear_min_interval_secs: u64,
}

impl Default for TravelPolicy {
    fn default() -> Self {
        Self {
            min_duration_secs: 600,
            max_duration_secs: 86_400,
            cooldown_secs: 1_800,
            safety_multiplier: 3,
            base_rate_per_hour: 10_000_000_000_000_000,
            settlement_fee: 5_000_000_000_000_000,
            emergency_fee: 1_000_000_000_000_000,
            fee_policy: FeePolicy::Flat,
            clear_min_interval_secs: 300,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only event history. Transitions are never overwritten; the record
/// reflects current state, the events preserve how it got there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TravelEvent {
    TravelStarted {
        asset_id: u64,
        owner: Identity,
        target_chain_id: u64,
        #[serde(with = "serde_hex32")]
        message_id: MessageId,
        start_time: u64,
        max_duration_secs: u64,
        deposited: u128,
    },
    ArrivalAcknowledged {
        asset_id: u64,
        #[serde(with = "serde_hex32")]
        message_id: MessageId,
        at: u64,
    },
    ReturnAcknowledged {
        asset_id: u64,
        #[serde(with = "serde_hex32")]
        message_id: MessageId,
        at: u64,
    },
    /// Carries the exact refunded amount.
    ProvisionsRefunded {
        asset_id: u64,
        owner: Identity,
        amount: u128,
        at: u64,
    },
    TravelCompleted {
        asset_id: u64,
        outcome: serde_json::Value,
        at: u64,
    },
    TravelFailed {
        asset_id: u64,
        reason: String,
        at: u64,
    },
    EmergencyReturn {
        asset_id: u64,
        owner: Identity,
        at: u64,
    },
    TravelCancelled {
        asset_id: u64,
        at: u64,
    },
    /// Audit trail for the administrative escape hatch.
    StuckTravelCleared {
        asset_id: u64,
        cleared_by: Identity,
        previous_status: TravelStatus,
        at: u64,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERDE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

mod serde_hex20 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 20], D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(de::Error::custom)?;
        Ok(bytes)
    }
}

pub(crate) mod serde_hex32 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(de::Error::custom)?;
        Ok(bytes)
    }
}

pub(crate) mod serde_hex32_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<[u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&format!("0x{}", hex::encode(b))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 32]>, D::Error> {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => {
                let s = s.strip_prefix("0x").unwrap_or(&s);
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes).map_err(serde::de::Error::custom)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}
