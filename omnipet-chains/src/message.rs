//! Wire codec for cross-chain travel messages.
//!
//! Messages are framed as a single type byte followed by a JSON body. The
//! message id is a Keccak-256 digest over the destination chain id, the
//! framed payload, and a dispatch nonce, so retransmissions of the same
//! logical message get distinct ids.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::ChainError;

/// 32-byte cross-chain message identifier.
pub type MessageId = [u8; 32];

/// Message types carried over the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Asset leaves the home chain for the target chain.
    PetDeparture = 0,
    /// Asset returns from the target chain.
    PetReturn = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::PetDeparture),
            1 => Ok(Self::PetReturn),
            _ => Err(ChainError::InvalidMessageType(value)),
        }
    }
}

/// Departure payload sent to the target chain when a travel starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeparturePayload {
    /// Travelling asset id.
    pub asset_id: u64,
    /// Owner identity, hex-encoded.
    pub owner: String,
    /// Requested travel duration in seconds.
    pub duration_secs: u64,
    /// Unix timestamp of dispatch on the home chain.
    pub dispatched_at: u64,
}

/// Return payload received when the target chain releases the asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnPayload {
    /// Travelling asset id.
    pub asset_id: u64,
    /// Opaque outcome data produced on the target chain.
    pub outcome: serde_json::Value,
}

/// Framed travel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelMessage {
    pub msg_type: MessageType,
    pub body: Vec<u8>,
}

impl TravelMessage {
    /// Frame a departure message.
    pub fn departure(payload: &DeparturePayload) -> Result<Self, ChainError> {
        Ok(Self {
            msg_type: MessageType::PetDeparture,
            body: serde_json::to_vec(payload)?,
        })
    }

    /// Frame a return message.
    pub fn pet_return(payload: &ReturnPayload) -> Result<Self, ChainError> {
        Ok(Self {
            msg_type: MessageType::PetReturn,
            body: serde_json::to_vec(payload)?,
        })
    }

    /// Encode to the wire format: type byte + JSON body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.body.len());
        out.push(self.msg_type as u8);
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode from the wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        if bytes.is_empty() {
            return Err(ChainError::Decoding("empty payload".into()));
        }
        let msg_type = MessageType::try_from(bytes[0])?;
        Ok(Self {
            msg_type,
            body: bytes[1..].to_vec(),
        })
    }

    /// Decode the body as a departure payload.
    pub fn as_departure(&self) -> Result<DeparturePayload, ChainError> {
        if self.msg_type != MessageType::PetDeparture {
            return Err(ChainError::InvalidMessageType(self.msg_type as u8));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode the body as a return payload.
    pub fn as_return(&self) -> Result<ReturnPayload, ChainError> {
        if self.msg_type != MessageType::PetReturn {
            return Err(ChainError::InvalidMessageType(self.msg_type as u8));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Derive a message id from destination chain, framed payload and nonce.
pub fn derive_message_id(chain_id: u64, payload: &[u8], nonce: u64) -> MessageId {
    let mut hasher = Keccak256::new();
    hasher.update(chain_id.to_be_bytes());
    hasher.update(payload);
    hasher.update(nonce.to_be_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_departure() -> DeparturePayload {
        DeparturePayload {
            asset_id: 5,
            owner: format!("0x{}", "ab".repeat(20)),
            duration_secs: 3600,
            dispatched_at: 1_700_000_000,
        }
    }

    #[test]
    fn departure_round_trip() {
        let msg = TravelMessage::departure(&sample_departure()).unwrap();
        let decoded = TravelMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::PetDeparture);

        let payload = decoded.as_departure().unwrap();
        assert_eq!(payload.asset_id, 5);
        assert_eq!(payload.duration_secs, 3600);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let msg = TravelMessage::departure(&sample_departure()).unwrap();
        assert!(msg.as_return().is_err());
        assert!(TravelMessage::decode(&[9u8, 1, 2]).is_err());
        assert!(TravelMessage::decode(&[]).is_err());
    }

    #[test]
    fn message_ids_differ_by_nonce() {
        let payload = TravelMessage::departure(&sample_departure())
            .unwrap()
            .encode();
        let a = derive_message_id(97, &payload, 0);
        let b = derive_message_id(97, &payload, 1);
        assert_ne!(a, b);
        assert_eq!(a, derive_message_id(97, &payload, 0));
    }
}
