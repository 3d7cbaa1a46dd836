//! Local travel mirror.
//!
//! A sled-backed copy of the controller's travel records plus coordinator
//! bookkeeping (retry counts, attention flags). The mirror is a cache: the
//! controller is the source of truth, and every write here is an idempotent
//! upsert keyed by asset id, so replaying a sync is always safe.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::Db;
use thiserror::Error;

use omnipet_travel::TravelRecord;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror db error: {0}")]
    Db(#[from] sled::Error),

    #[error("mirror codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("failed to create mirror directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Mirror entry: the controller record plus coordinator bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub record: TravelRecord,
    /// Recovery attempts made against this travel.
    pub retry_count: u32,
    /// Set when recovery attempts are exhausted; cleared on the next
    /// successful sync.
    pub needs_attention: bool,
    /// Unix seconds of the last successful sync from the controller.
    pub last_synced_at: u64,
}

#[derive(Clone)]
pub struct MirrorStore {
    db: Db,
}

impl MirrorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MirrorError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            db: sled::open(path_ref)?,
        })
    }

    /// In-memory store for tests and local runs.
    pub fn temporary() -> Result<Self, MirrorError> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    /// Upsert the controller's record, preserving local bookkeeping.
    ///
    /// A record that is no longer active resets the retry count and clears
    /// the attention flag: the travel reached a terminal state, nothing is
    /// left to recover.
    pub fn sync(&self, record: &TravelRecord, now: u64) -> Result<(), MirrorError> {
        let previous = self.get(record.asset_id)?;
        let (retry_count, needs_attention) = if record.status.is_active() {
            previous
                .map(|e| (e.retry_count, e.needs_attention))
                .unwrap_or((0, false))
        } else {
            (0, false)
        };
        self.put(MirrorEntry {
            record: record.clone(),
            retry_count,
            needs_attention,
            last_synced_at: now,
        })
    }

    pub fn get(&self, asset_id: u64) -> Result<Option<MirrorEntry>, MirrorError> {
        match self.db.get(asset_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Bump the retry counter; returns the new count.
    pub fn record_retry(&self, asset_id: u64) -> Result<u32, MirrorError> {
        match self.get(asset_id)? {
            Some(mut entry) => {
                entry.retry_count += 1;
                let count = entry.retry_count;
                self.put(entry)?;
                Ok(count)
            }
            None => Ok(0),
        }
    }

    /// Flag an entry for operator attention.
    pub fn flag_attention(&self, asset_id: u64) -> Result<(), MirrorError> {
        if let Some(mut entry) = self.get(asset_id)? {
            entry.needs_attention = true;
            self.put(entry)?;
        }
        Ok(())
    }

    /// Every mirrored entry, sorted by asset id.
    pub fn all(&self) -> Result<Vec<MirrorEntry>, MirrorError> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (_, bytes) = item?;
            entries.push(serde_json::from_slice(&bytes)?);
        }
        Ok(entries)
    }

    /// Entries currently flagged for operator attention.
    pub fn attention_needed(&self) -> Result<Vec<MirrorEntry>, MirrorError> {
        Ok(self.all()?.into_iter().filter(|e| e.needs_attention).collect())
    }

    fn put(&self, entry: MirrorEntry) -> Result<(), MirrorError> {
        let bytes = serde_json::to_vec(&entry)?;
        self.db.insert(entry.record.asset_id.to_be_bytes(), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnipet_travel::{Identity, ProvisionsEscrow, TravelStatus};

    fn record(asset_id: u64, status: TravelStatus) -> TravelRecord {
        TravelRecord {
            asset_id,
            owner: Identity([1; 20]),
            target_chain_id: 97,
            start_time: 1_000,
            max_duration_secs: 3_600,
            escrow: ProvisionsEscrow::new(100),
            status,
            outbound_message_id: None,
            return_message_id: None,
            completed_at: None,
        }
    }

    #[test]
    fn sync_is_an_idempotent_upsert() {
        let store = MirrorStore::temporary().unwrap();
        let rec = record(5, TravelStatus::Traveling);

        store.sync(&rec, 2_000).unwrap();
        store.sync(&rec, 2_030).unwrap();

        let entries = store.all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.asset_id, 5);
        assert_eq!(entries[0].last_synced_at, 2_030);
    }

    #[test]
    fn retry_bookkeeping_survives_active_syncs() {
        let store = MirrorStore::temporary().unwrap();
        let rec = record(5, TravelStatus::Traveling);
        store.sync(&rec, 2_000).unwrap();

        assert_eq!(store.record_retry(5).unwrap(), 1);
        assert_eq!(store.record_retry(5).unwrap(), 2);
        store.flag_attention(5).unwrap();

        store.sync(&rec, 2_060).unwrap();
        let entry = store.get(5).unwrap().unwrap();
        assert_eq!(entry.retry_count, 2);
        assert!(entry.needs_attention);
        assert_eq!(store.attention_needed().unwrap().len(), 1);
    }

    #[test]
    fn terminal_sync_clears_bookkeeping() {
        let store = MirrorStore::temporary().unwrap();
        store.sync(&record(5, TravelStatus::Traveling), 2_000).unwrap();
        store.record_retry(5).unwrap();
        store.flag_attention(5).unwrap();

        store.sync(&record(5, TravelStatus::Completed), 2_100).unwrap();
        let entry = store.get(5).unwrap().unwrap();
        assert_eq!(entry.record.status, TravelStatus::Completed);
        assert_eq!(entry.retry_count, 0);
        assert!(!entry.needs_attention);
    }
}
