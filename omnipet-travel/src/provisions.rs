//! Provisions accounting.
//!
//! The required deposit is a pure function of duration and target chain:
//! a per-hour base rate plus the chain's fixed settlement surcharge. The
//! consumed estimate at completion is a flat fee by default; metering is a
//! policy choice carried in [`FeePolicy`].

use omnipet_chains::ChainConfig;

use crate::state::{FeePolicy, TravelPolicy, TravelRecord};

/// Seconds per billed hour; partial hours round up.
const SECS_PER_HOUR: u64 = 3_600;

fn billed_hours(duration_secs: u64) -> u128 {
    u128::from(duration_secs.div_ceil(SECS_PER_HOUR).max(1))
}

/// Required deposit for a travel of `duration_secs` to `chain`.
/// Monotonic in duration.
pub fn required_deposit(policy: &TravelPolicy, duration_secs: u64, chain: &ChainConfig) -> u128 {
    policy.base_rate_per_hour * billed_hours(duration_secs) + chain.settlement_surcharge
}

/// Settlement cost charged against the escrow on normal completion.
///
/// Never exceeds the deposited amount.
pub fn consumed_estimate(policy: &TravelPolicy, record: &TravelRecord, now: u64) -> u128 {
    let estimate = match policy.fee_policy {
        FeePolicy::Flat => policy.settlement_fee,
        FeePolicy::Metered { rate_per_hour } => {
            let elapsed = now.saturating_sub(record.start_time);
            rate_per_hour * billed_hours(elapsed)
        }
    };
    estimate.min(record.escrow.deposited)
}

/// Refundable remainder: deposited minus consumed, floored at zero.
pub fn refundable(deposited: u128, consumed: u128) -> u128 {
    deposited.saturating_sub(consumed)
}
