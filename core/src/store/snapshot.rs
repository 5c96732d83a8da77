use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::index::Identity;

use super::durable::replace_file;
use super::{Records, StoreError, WalRecord};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    version: u32,
    next_identity: Identity,
    records: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    identity: Identity,
    label: String,
    embedding: Vec<u8>,
}

pub(super) fn load_snapshot(path: &Path, records: &mut Records) -> Result<(), StoreError> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let snapshot: SnapshotDocument = serde_json::from_str(&raw)?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::InvalidData(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    for entry in snapshot.records {
        if entry.identity >= snapshot.next_identity {
            return Err(StoreError::InvalidData(format!(
                "snapshot identity {} is not below next identity {}",
                entry.identity, snapshot.next_identity
            )));
        }
        records.apply(&WalRecord::InsertRecord {
            identity: entry.identity,
            label: entry.label,
            embedding: entry.embedding,
        })?;
    }
    // Deleted identities above the highest surviving one stay reserved.
    records.reserve_next_identity(snapshot.next_identity);

    Ok(())
}

pub(super) fn write_snapshot(path: &Path, records: &Records) -> Result<(), StoreError> {
    let snapshot = SnapshotDocument {
        version: SNAPSHOT_VERSION,
        next_identity: records.next_identity(),
        records: records
            .iter()
            .map(|(identity, record)| SnapshotRecord {
                identity,
                label: record.label.clone(),
                embedding: record.embedding.clone(),
            })
            .collect(),
    };

    replace_file(path, &serde_json::to_vec(&snapshot)?)
}
