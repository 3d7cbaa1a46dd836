//! The travel controller: single source of truth for asset travel state.
//!
//! Transitions are serialized per controller instance (`&mut self`), so every
//! precondition is re-validated against the state that is actually committed,
//! not a stale read. All failures reject synchronously with a specific
//! [`TravelError`] and leave no partial mutation behind: the cross-chain
//! dispatch happens before any state is written.

use std::collections::HashMap;
use std::sync::Arc;

use omnipet_chains::{DeparturePayload, MessageId, MessagingAdapter, TravelMessage};

use crate::provisions;
use crate::state::{
    AssetStatus, Identity, ProvisionsEscrow, TravelEvent, TravelPolicy, TravelRecord, TravelStatus,
};
use crate::TravelError;

/// Home-chain view of one asset.
#[derive(Debug, Clone)]
pub struct AssetState {
    pub owner: Identity,
    pub status: AssetStatus,
    /// Unix seconds before which no new travel may start.
    pub cooldown_end: u64,
}

pub struct TravelController {
    policy: TravelPolicy,
    coordinator: Identity,
    admin: Identity,
    adapter: Arc<MessagingAdapter>,
    assets: HashMap<u64, AssetState>,
    /// Latest record per asset; at most one active at a time.
    travels: HashMap<u64, TravelRecord>,
    events: Vec<TravelEvent>,
    last_clear_at: Option<u64>,
}

impl TravelController {
    pub fn new(
        policy: TravelPolicy,
        coordinator: Identity,
        admin: Identity,
        adapter: Arc<MessagingAdapter>,
    ) -> Self {
        Self {
            policy,
            coordinator,
            admin,
            adapter,
            assets: HashMap::new(),
            travels: HashMap::new(),
            events: Vec::new(),
            last_clear_at: None,
        }
    }

    /// The identity recognized for `mark_completed`/`emergency_return`.
    /// The coordinator's startup self-check compares against this.
    pub fn authorized_coordinator(&self) -> Identity {
        self.coordinator
    }

    pub fn policy(&self) -> &TravelPolicy {
        &self.policy
    }

    /// Register an asset under `owner`, idle and cooldown-free.
    pub fn register_asset(&mut self, asset_id: u64, owner: Identity) {
        self.assets.entry(asset_id).or_insert(AssetState {
            owner,
            status: AssetStatus::Idle,
            cooldown_end: 0,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a cross-chain travel.
    ///
    /// Requires: caller owns the asset, asset is idle with no active record,
    /// target chain enabled, duration within policy bounds, deposit covers
    /// the required provisions, cooldown elapsed. On success the asset is
    /// locked, provisions escrowed, and a departure message dispatched.
    pub fn start_travel(
        &mut self,
        caller: Identity,
        asset_id: u64,
        target_chain_id: u64,
        duration_secs: u64,
        deposit: u128,
        now: u64,
    ) -> Result<MessageId, TravelError> {
        let asset = self
            .assets
            .get(&asset_id)
            .ok_or(TravelError::UnknownAsset(asset_id))?;
        if caller != asset.owner {
            return Err(TravelError::Unauthorized);
        }
        if asset.status != AssetStatus::Idle {
            let status = self
                .travels
                .get(&asset_id)
                .map(|r| r.status)
                .unwrap_or(TravelStatus::None);
            return Err(TravelError::InvalidState { status });
        }
        // Mutual exclusion: reject if any record for this asset is still
        // in flight, independent of the asset flag.
        if let Some(record) = self.travels.get(&asset_id) {
            if record.status.is_active() {
                return Err(TravelError::InvalidState {
                    status: record.status,
                });
            }
        }
        if duration_secs < self.policy.min_duration_secs
            || duration_secs > self.policy.max_duration_secs
        {
            return Err(TravelError::InvalidDuration {
                duration_secs,
                min: self.policy.min_duration_secs,
                max: self.policy.max_duration_secs,
            });
        }
        if now < asset.cooldown_end {
            return Err(TravelError::CooldownActive {
                until: asset.cooldown_end,
            });
        }

        let chain = self
            .adapter
            .registry()
            .get_enabled(target_chain_id)
            .map_err(TravelError::from_chain)?;
        let required = provisions::required_deposit(&self.policy, duration_secs, &chain);
        if deposit < required {
            return Err(TravelError::InsufficientProvisions {
                required,
                provided: deposit,
            });
        }

        let owner = asset.owner;
        let message = TravelMessage::departure(&DeparturePayload {
            asset_id,
            owner: owner.to_string(),
            duration_secs,
            dispatched_at: now,
        })
        .map_err(TravelError::from_chain)?;
        // Dispatch before committing: a relay rejection leaves no state behind.
        let message_id = self
            .adapter
            .dispatch(target_chain_id, &message)
            .map_err(TravelError::from_chain)?;

        let record = TravelRecord {
            asset_id,
            owner,
            target_chain_id,
            start_time: now,
            max_duration_secs: duration_secs,
            escrow: ProvisionsEscrow::new(deposit),
            status: TravelStatus::Traveling,
            outbound_message_id: Some(message_id),
            return_message_id: None,
            completed_at: None,
        };
        self.travels.insert(asset_id, record);
        if let Some(asset) = self.assets.get_mut(&asset_id) {
            asset.status = AssetStatus::Locked;
        }
        self.events.push(TravelEvent::TravelStarted {
            asset_id,
            owner,
            target_chain_id,
            message_id,
            start_time: now,
            max_duration_secs: duration_secs,
            deposited: deposit,
        });
        Ok(message_id)
    }

    /// Record the target chain's arrival acknowledgement.
    /// Coordinator-only; closes the cancellation window.
    pub fn acknowledge_arrival(
        &mut self,
        caller: Identity,
        asset_id: u64,
        message_id: MessageId,
        now: u64,
    ) -> Result<(), TravelError> {
        if caller != self.coordinator {
            return Err(TravelError::Unauthorized);
        }
        let record = self.active_record_mut(asset_id)?;
        if record.status != TravelStatus::Traveling {
            return Err(TravelError::InvalidState {
                status: record.status,
            });
        }
        record.status = TravelStatus::OnTargetChain;
        self.events.push(TravelEvent::ArrivalAcknowledged {
            asset_id,
            message_id,
            at: now,
        });
        Ok(())
    }

    /// Record the return message from the target chain.
    /// Coordinator-only; the record settles on the following completion.
    pub fn acknowledge_return(
        &mut self,
        caller: Identity,
        asset_id: u64,
        message_id: MessageId,
        now: u64,
    ) -> Result<(), TravelError> {
        if caller != self.coordinator {
            return Err(TravelError::Unauthorized);
        }
        let record = self.active_record_mut(asset_id)?;
        if record.status != TravelStatus::OnTargetChain {
            return Err(TravelError::InvalidState {
                status: record.status,
            });
        }
        record.status = TravelStatus::Returning;
        record.return_message_id = Some(message_id);
        self.events.push(TravelEvent::ReturnAcknowledged {
            asset_id,
            message_id,
            at: now,
        });
        Ok(())
    }

    /// Complete a travel: coordinator-only, idempotent.
    ///
    /// Refunds `deposited - consumed estimate` to the owner, applies the
    /// cooldown, and emits a refund event with the exact amount. A second
    /// call finds the record already `Completed` and returns `InvalidState`
    /// without any further refund. A record already in `Failed`/`Timeout`
    /// may still be completed as a pure unlock; its escrow is already
    /// settled, so the refund is whatever remains (normally zero).
    pub fn mark_completed(
        &mut self,
        caller: Identity,
        asset_id: u64,
        outcome: serde_json::Value,
        now: u64,
    ) -> Result<u128, TravelError> {
        if caller != self.coordinator {
            return Err(TravelError::Unauthorized);
        }
        let record = self
            .travels
            .get_mut(&asset_id)
            .ok_or(TravelError::InvalidState {
                status: TravelStatus::None,
            })?;
        if matches!(record.status, TravelStatus::None | TravelStatus::Completed) {
            return Err(TravelError::InvalidState {
                status: record.status,
            });
        }

        let refund = if record.status.is_active() {
            let consumed = provisions::consumed_estimate(&self.policy, record, now);
            let refund = provisions::refundable(record.escrow.deposited, consumed);
            record.escrow.consumed = consumed;
            record.escrow.refunded = refund;
            refund
        } else {
            // Terminal record: unlock only, refund the settled remainder.
            let refund = record.escrow.remaining();
            record.escrow.refunded += refund;
            refund
        };
        let owner = record.owner;
        record.status = TravelStatus::Completed;
        record.completed_at = Some(now);

        self.release_asset(asset_id, now + self.policy.cooldown_secs);
        self.events.push(TravelEvent::ProvisionsRefunded {
            asset_id,
            owner,
            amount: refund,
            at: now,
        });
        self.events.push(TravelEvent::TravelCompleted {
            asset_id,
            outcome,
            at: now,
        });
        Ok(refund)
    }

    /// Timeout-triggered forced completion, callable by owner or coordinator
    /// once `now >= start + k * max_duration`. Refunds the full deposit minus
    /// the minimal settlement fee.
    pub fn emergency_return(
        &mut self,
        caller: Identity,
        asset_id: u64,
        now: u64,
    ) -> Result<u128, TravelError> {
        let record = self.active_record(asset_id)?;
        if caller != record.owner && caller != self.coordinator {
            return Err(TravelError::Unauthorized);
        }
        let eligible_at = record.emergency_eligible_at(self.policy.safety_multiplier);
        if now < eligible_at {
            return Err(TravelError::NotYetEligible { eligible_at });
        }

        let emergency_fee = self.policy.emergency_fee;
        let record = self.active_record_mut(asset_id)?;
        let consumed = emergency_fee.min(record.escrow.deposited);
        let refund = provisions::refundable(record.escrow.deposited, consumed);
        record.escrow.consumed = consumed;
        record.escrow.refunded = refund;
        let owner = record.owner;
        record.status = TravelStatus::Timeout;
        record.completed_at = Some(now);

        self.release_asset(asset_id, now + self.policy.cooldown_secs);
        self.events.push(TravelEvent::ProvisionsRefunded {
            asset_id,
            owner,
            amount: refund,
            at: now,
        });
        self.events.push(TravelEvent::EmergencyReturn {
            asset_id,
            owner,
            at: now,
        });
        Ok(refund)
    }

    /// Owner-initiated cancellation, offered only pre-crossing (the outbound
    /// message not yet acknowledged by the target chain). Full refund, no
    /// cooldown, record cleared to `None`.
    pub fn cancel_travel(
        &mut self,
        caller: Identity,
        asset_id: u64,
        now: u64,
    ) -> Result<u128, TravelError> {
        let record = self.active_record(asset_id)?;
        if caller != record.owner {
            return Err(TravelError::Unauthorized);
        }
        if !record.status.is_pre_crossing() {
            return Err(TravelError::InvalidState {
                status: record.status,
            });
        }

        let record = self
            .travels
            .remove(&asset_id)
            .ok_or(TravelError::InvalidState {
                status: TravelStatus::None,
            })?;
        let refund = record.escrow.deposited;
        if let Some(asset) = self.assets.get_mut(&asset_id) {
            asset.status = AssetStatus::Idle;
            // Cancellation is free: cooldown untouched.
        }
        self.events.push(TravelEvent::ProvisionsRefunded {
            asset_id,
            owner: record.owner,
            amount: refund,
            at: now,
        });
        self.events
            .push(TravelEvent::TravelCancelled { asset_id, at: now });
        Ok(refund)
    }

    /// Coordinator-reported failure (e.g. the target chain rejected the
    /// message). Full refund of the remainder, no cooldown.
    pub fn mark_failed(
        &mut self,
        caller: Identity,
        asset_id: u64,
        reason: &str,
        now: u64,
    ) -> Result<u128, TravelError> {
        if caller != self.coordinator {
            return Err(TravelError::Unauthorized);
        }
        let record = self.active_record_mut(asset_id)?;
        let refund = record.escrow.remaining();
        record.escrow.refunded += refund;
        let owner = record.owner;
        record.status = TravelStatus::Failed;
        record.completed_at = Some(now);

        if let Some(asset) = self.assets.get_mut(&asset_id) {
            asset.status = AssetStatus::Idle;
        }
        self.events.push(TravelEvent::ProvisionsRefunded {
            asset_id,
            owner,
            amount: refund,
            at: now,
        });
        self.events.push(TravelEvent::TravelFailed {
            asset_id,
            reason: reason.to_string(),
            at: now,
        });
        Ok(refund)
    }

    /// Administrative escape hatch for diverged state: forces the record to
    /// `None` without re-running refund logic. Admin-only, rate limited,
    /// audited via the event history.
    pub fn clear_stuck_travel(
        &mut self,
        caller: Identity,
        asset_id: u64,
        now: u64,
    ) -> Result<(), TravelError> {
        if caller != self.admin {
            return Err(TravelError::Unauthorized);
        }
        if let Some(last) = self.last_clear_at {
            let next_allowed_at = last + self.policy.clear_min_interval_secs;
            if now < next_allowed_at {
                return Err(TravelError::RateLimited { next_allowed_at });
            }
        }
        let record = self
            .travels
            .remove(&asset_id)
            .ok_or(TravelError::InvalidState {
                status: TravelStatus::None,
            })?;
        if let Some(asset) = self.assets.get_mut(&asset_id) {
            asset.status = AssetStatus::Idle;
        }
        self.last_clear_at = Some(now);
        self.events.push(TravelEvent::StuckTravelCleared {
            asset_id,
            cleared_by: caller,
            previous_status: record.status,
            at: now,
        });
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn travel_record(&self, asset_id: u64) -> Option<&TravelRecord> {
        self.travels.get(&asset_id)
    }

    pub fn asset(&self, asset_id: u64) -> Option<&AssetState> {
        self.assets.get(&asset_id)
    }

    /// Whether a fresh travel could start now (ignoring deposit and chain).
    pub fn can_start_travel(&self, asset_id: u64, now: u64) -> bool {
        let Some(asset) = self.assets.get(&asset_id) else {
            return false;
        };
        let active = self
            .travels
            .get(&asset_id)
            .map(|r| r.status.is_active())
            .unwrap_or(false);
        asset.status == AssetStatus::Idle && !active && now >= asset.cooldown_end
    }

    /// Refundable remainder for the asset's current record, zero when none.
    pub fn refundable_provisions(&self, asset_id: u64, now: u64) -> u128 {
        match self.travels.get(&asset_id) {
            Some(record) if record.status.is_active() => {
                let consumed = provisions::consumed_estimate(&self.policy, record, now);
                provisions::refundable(record.escrow.deposited, consumed)
            }
            Some(record) => record.escrow.remaining(),
            None => 0,
        }
    }

    /// All records whose travel is still in flight.
    pub fn active_records(&self) -> Vec<TravelRecord> {
        self.travels
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect()
    }

    /// Append-only event history.
    pub fn events(&self) -> &[TravelEvent] {
        &self.events
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════

    fn active_record(&self, asset_id: u64) -> Result<&TravelRecord, TravelError> {
        match self.travels.get(&asset_id) {
            Some(record) if record.status.is_active() => Ok(record),
            Some(record) => Err(TravelError::InvalidState {
                status: record.status,
            }),
            None => Err(TravelError::InvalidState {
                status: TravelStatus::None,
            }),
        }
    }

    fn active_record_mut(&mut self, asset_id: u64) -> Result<&mut TravelRecord, TravelError> {
        match self.travels.get_mut(&asset_id) {
            Some(record) if record.status.is_active() => Ok(record),
            Some(record) => Err(TravelError::InvalidState {
                status: record.status,
            }),
            None => Err(TravelError::InvalidState {
                status: TravelStatus::None,
            }),
        }
    }

    fn release_asset(&mut self, asset_id: u64, cooldown_end: u64) {
        if let Some(asset) = self.assets.get_mut(&asset_id) {
            asset.status = AssetStatus::Idle;
            asset.cooldown_end = cooldown_end;
        }
    }
}
