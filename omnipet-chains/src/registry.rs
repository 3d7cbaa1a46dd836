//! Versioned chain connector registry.
//!
//! The registry is read-mostly and administrator-written. Reads hand out an
//! owned snapshot of a single record together with the registry version at
//! the time of the read, so a concurrent admin update can never produce a
//! torn record.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{ChainConfig, ChainError};

#[derive(Debug, Default)]
struct RegistryInner {
    version: u64,
    chains: HashMap<u64, ChainConfig>,
}

/// Shared registry handle. Cloning shares the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with the built-in chain set.
    pub fn with_builtin_chains() -> Self {
        let registry = Self::new();
        for cfg in crate::builtin_chains() {
            registry.upsert(cfg);
        }
        registry
    }

    /// Admin write: insert or replace a chain record. Bumps the version.
    pub fn upsert(&self, config: ChainConfig) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.version += 1;
        inner.chains.insert(config.chain_id, config);
    }

    /// Admin write: toggle the enabled flag. Bumps the version.
    ///
    /// Returns `UnsupportedChain` when no record exists for the chain.
    pub fn set_enabled(&self, chain_id: u64, enabled: bool) -> Result<(), ChainError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        match inner.chains.get_mut(&chain_id) {
            Some(cfg) => {
                cfg.enabled = enabled;
                inner.version += 1;
                Ok(())
            }
            None => Err(ChainError::UnsupportedChain(chain_id)),
        }
    }

    /// Snapshot read of a single record and the current registry version.
    pub fn get(&self, chain_id: u64) -> Option<(ChainConfig, u64)> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .chains
            .get(&chain_id)
            .map(|cfg| (cfg.clone(), inner.version))
    }

    /// Snapshot read of an enabled record; `UnsupportedChain` when the chain
    /// is missing or disabled.
    pub fn get_enabled(&self, chain_id: u64) -> Result<ChainConfig, ChainError> {
        match self.get(chain_id) {
            Some((cfg, _)) if cfg.enabled => Ok(cfg),
            _ => Err(ChainError::UnsupportedChain(chain_id)),
        }
    }

    /// Owned snapshot of every record, sorted by chain id.
    pub fn snapshot(&self) -> Vec<ChainConfig> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut chains: Vec<ChainConfig> = inner.chains.values().cloned().collect();
        chains.sort_by_key(|c| c.chain_id);
        chains
    }

    /// Current registry version.
    pub fn version(&self) -> u64 {
        self.inner.read().expect("registry lock poisoned").version
    }
}
