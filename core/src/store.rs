//! Authoritative record store: identity -> (label, embedding bytes).
//!
//! The similarity index is derived from this store and can always be rebuilt
//! from it. `RecordStore` keeps records in memory and, when given file paths,
//! makes every mutation durable through a JSON-lines write-ahead log that is
//! periodically folded into a snapshot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::Identity;

mod durable;
mod snapshot;
mod wal;

use snapshot::{load_snapshot, write_snapshot};
use wal::{append_wal, discard_wal_tail, replay_wal, truncate_wal};

const FIRST_IDENTITY: Identity = 1;

/// Persistence collaborator consumed by the index builder and the engine.
///
/// Methods block on I/O; async callers must run them on a blocking pool.
pub trait VectorStore: Send + Sync {
    fn count_records(&self) -> Result<usize, StoreError>;

    /// Returns up to `limit` records starting at `offset`, in creation order.
    fn fetch_batch(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Identity, Vec<u8>)>, StoreError>;

    fn insert_record(&self, label: &str, embedding: &[u8]) -> Result<Identity, StoreError>;

    /// Returns `false` when `identity` was not present.
    fn delete_record(&self, identity: Identity) -> Result<bool, StoreError>;

    fn lookup_label(&self, identity: Identity) -> Result<Option<String>, StoreError>;

    fn find_identity(&self, label: &str) -> Result<Option<Identity>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("label '{0}' is already enrolled")]
    DuplicateLabel(String),
    #[error("label must not be empty")]
    InvalidLabel,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid persistence data: {0}")]
    InvalidData(String),
    #[error("record store is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub snapshot_path: PathBuf,
    pub wal_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// `None` keeps everything in memory.
    pub paths: Option<StorePaths>,
    pub sync_on_write: bool,
    /// Number of logged writes between snapshots.
    pub checkpoint_interval: usize,
}

impl StoreOptions {
    pub fn in_memory() -> Self {
        Self {
            paths: None,
            sync_on_write: false,
            checkpoint_interval: usize::MAX,
        }
    }

    pub fn persistent(snapshot_path: PathBuf, wal_path: PathBuf) -> Self {
        Self {
            paths: Some(StorePaths {
                snapshot_path,
                wal_path,
            }),
            sync_on_write: true,
            checkpoint_interval: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalRecord {
    InsertRecord {
        identity: Identity,
        label: String,
        embedding: Vec<u8>,
    },
    DeleteRecord {
        identity: Identity,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub label: String,
    pub embedding: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct Records {
    by_identity: BTreeMap<Identity, StoredRecord>,
    by_label: BTreeMap<String, Identity>,
    next_identity: Identity,
}

impl Records {
    fn new() -> Self {
        Self {
            by_identity: BTreeMap::new(),
            by_label: BTreeMap::new(),
            next_identity: FIRST_IDENTITY,
        }
    }

    pub(crate) fn next_identity(&self) -> Identity {
        self.next_identity
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Identity, &StoredRecord)> + '_ {
        self.by_identity
            .iter()
            .map(|(identity, record)| (*identity, record))
    }

    pub(crate) fn reserve_next_identity(&mut self, at_least: Identity) {
        self.next_identity = self.next_identity.max(at_least);
    }

    /// Replays one logged mutation. Re-applying a record already present is a
    /// no-op so a WAL that outlived its checkpoint replays cleanly.
    pub(crate) fn apply(&mut self, record: &WalRecord) -> Result<(), StoreError> {
        match record {
            WalRecord::InsertRecord {
                identity,
                label,
                embedding,
            } => {
                if let Some(existing) = self.by_identity.get(identity) {
                    if existing.label == *label && existing.embedding == *embedding {
                        return Ok(());
                    }
                    return Err(StoreError::InvalidData(format!(
                        "identity {identity} already exists with different content"
                    )));
                }
                if self.by_label.contains_key(label) {
                    return Err(StoreError::InvalidData(format!(
                        "label '{label}' is assigned to more than one identity"
                    )));
                }
                self.by_identity.insert(
                    *identity,
                    StoredRecord {
                        label: label.clone(),
                        embedding: embedding.clone(),
                    },
                );
                self.by_label.insert(label.clone(), *identity);
                self.reserve_next_identity(identity.saturating_add(1));
                Ok(())
            }
            WalRecord::DeleteRecord { identity } => {
                if let Some(removed) = self.by_identity.remove(identity) {
                    let _ = self.by_label.remove(&removed.label);
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct StoreState {
    records: Records,
    writes_since_checkpoint: usize,
}

#[derive(Debug)]
pub struct RecordStore {
    options: StoreOptions,
    state: Mutex<StoreState>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self::with_records(StoreOptions::in_memory(), Records::new())
    }

    /// Opens the store, replaying snapshot then WAL when paths are configured.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        if options.checkpoint_interval == 0 {
            return Err(StoreError::InvalidData(
                "checkpoint interval must be > 0".to_string(),
            ));
        }

        let mut records = Records::new();
        if let Some(paths) = &options.paths {
            load_snapshot(&paths.snapshot_path, &mut records)?;
            if let Some(complete_len) = replay_wal(&paths.wal_path, &mut records)? {
                discard_wal_tail(&paths.wal_path, complete_len)?;
            }
        }
        Ok(Self::with_records(options, records))
    }

    fn with_records(options: StoreOptions, records: Records) -> Self {
        Self {
            options,
            state: Mutex::new(StoreState {
                records,
                writes_since_checkpoint: 0,
            }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.options.paths.is_some()
    }

    /// Writes a snapshot of the current records and truncates the WAL.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        self.checkpoint_locked(&mut state)
    }

    fn checkpoint_locked(&self, state: &mut StoreState) -> Result<(), StoreError> {
        let Some(paths) = &self.options.paths else {
            return Ok(());
        };
        write_snapshot(&paths.snapshot_path, &state.records)?;
        truncate_wal(&paths.wal_path)?;
        state.writes_since_checkpoint = 0;
        Ok(())
    }

    fn commit(&self, state: &mut StoreState, record: WalRecord) -> Result<(), StoreError> {
        if let Some(paths) = &self.options.paths {
            append_wal(&paths.wal_path, &record, self.options.sync_on_write)?;
        }
        state.records.apply(&record)?;

        state.writes_since_checkpoint = state.writes_since_checkpoint.saturating_add(1);
        if state.writes_since_checkpoint >= self.options.checkpoint_interval {
            // The write is already durable in the WAL; a failed checkpoint is
            // retried on the next write.
            let _ = self.checkpoint_locked(state);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("record store lock poisoned".to_string()))
    }
}

impl VectorStore for RecordStore {
    fn count_records(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.records.by_identity.len())
    }

    fn fetch_batch(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Identity, Vec<u8>)>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .records
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(identity, record)| (identity, record.embedding.clone()))
            .collect())
    }

    fn insert_record(&self, label: &str, embedding: &[u8]) -> Result<Identity, StoreError> {
        if label.trim().is_empty() {
            return Err(StoreError::InvalidLabel);
        }

        let mut state = self.lock()?;
        if state.records.by_label.contains_key(label) {
            return Err(StoreError::DuplicateLabel(label.to_string()));
        }

        let identity = state.records.next_identity;
        self.commit(
            &mut state,
            WalRecord::InsertRecord {
                identity,
                label: label.to_string(),
                embedding: embedding.to_vec(),
            },
        )?;
        Ok(identity)
    }

    fn delete_record(&self, identity: Identity) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if !state.records.by_identity.contains_key(&identity) {
            return Ok(false);
        }
        self.commit(&mut state, WalRecord::DeleteRecord { identity })?;
        Ok(true)
    }

    fn lookup_label(&self, identity: Identity) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .records
            .by_identity
            .get(&identity)
            .map(|record| record.label.clone()))
    }

    fn find_identity(&self, label: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.lock()?.records.by_label.get(label).copied())
    }
}

#[cfg(test)]
mod tests;
