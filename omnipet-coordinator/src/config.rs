//! Coordinator configuration.
//!
//! Loaded from an optional `omnipet.toml` file, overridden by `OMNIPET_*`
//! environment variables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use omnipet_travel::Identity;

/// Coordinator configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct CoordinatorConfig {
    /// Hex-encoded identity this coordinator calls the controller with.
    pub coordinator_identity: String,
    /// Path of the local sled mirror database.
    #[serde(default = "default_mirror_db_path")]
    pub mirror_db_path: String,
    /// Polling interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum recovery attempts per travel before it is flagged for
    /// operator attention.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on concurrently running recovery tasks.
    #[serde(default = "default_max_concurrent_recoveries")]
    pub max_concurrent_recoveries: usize,
    /// Per-call timeout in seconds for controller calls.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Base backoff in milliseconds; doubles per attempt, with jitter.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Safety multiplier `k` used to detect emergency-eligible travels.
    /// Must match the controller policy; the controller re-validates anyway.
    #[serde(default = "default_safety_multiplier")]
    pub safety_multiplier: u32,
}

fn default_mirror_db_path() -> String {
    "data/travel-mirror.db".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_concurrent_recoveries() -> usize {
    8
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_safety_multiplier() -> u32 {
    3
}

impl CoordinatorConfig {
    /// Load from `omnipet.toml` (if present) and `OMNIPET_*` environment
    /// variables, then validate.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("omnipet").required(false))
            .add_source(config::Environment::with_prefix("OMNIPET"))
            .build()
            .context("failed to assemble coordinator configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("invalid coordinator configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.identity()
            .context("coordinator_identity is not a valid 20-byte hex identity")?;
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be positive");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be positive, a zero budget would never recover anything");
        }
        if self.backoff_base_ms == 0 {
            bail!("backoff_base_ms must be positive");
        }
        if self.max_concurrent_recoveries == 0 {
            bail!("max_concurrent_recoveries must be positive");
        }
        if self.call_timeout_secs == 0 {
            bail!("call_timeout_secs must be positive");
        }
        if self.safety_multiplier == 0 {
            bail!("safety_multiplier must be positive");
        }
        Ok(())
    }

    /// Parsed coordinator identity.
    pub fn identity(&self) -> Result<Identity> {
        Identity::from_hex(&self.coordinator_identity)
            .map_err(|err| anyhow::anyhow!("bad coordinator identity: {err}"))
    }
}
