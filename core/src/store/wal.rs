use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use super::durable::{create_store_dir, empty_file, sync_store_dir};
use super::{Records, StoreError, WalRecord};

pub(super) fn append_wal(
    path: &Path,
    record: &WalRecord,
    sync_on_write: bool,
) -> Result<(), StoreError> {
    create_store_dir(path)?;

    let existed = path.exists();
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let committed_len = file.metadata()?.len();
    if let Err(error) = write_line(&mut file, &line, sync_on_write) {
        // A partial line must not prefix the next append.
        let _ = file.set_len(committed_len);
        return Err(error.into());
    }
    if !existed {
        sync_store_dir(path)?;
    }
    Ok(())
}

fn write_line(file: &mut File, line: &[u8], sync_on_write: bool) -> std::io::Result<()> {
    file.write_all(line)?;
    if sync_on_write {
        file.flush()?;
        file.sync_data()?;
    }
    Ok(())
}

/// Cuts the log back to `len` bytes, dropping a torn tail left by a crash.
pub(super) fn discard_wal_tail(path: &Path, len: u64) -> Result<(), StoreError> {
    let file = OpenOptions::new().write(true).open(path)?;
    if file.metadata()?.len() > len {
        file.set_len(len)?;
        file.sync_all()?;
    }
    Ok(())
}

pub(super) fn truncate_wal(path: &Path) -> Result<(), StoreError> {
    empty_file(path)
}

/// Applies every logged record on top of `records` and returns the length of
/// the log up to the end of its last complete line.
///
/// Every append ends with a newline, so an unterminated final line is a write
/// that never completed and is skipped; any other malformed line fails the
/// replay.
pub(super) fn replay_wal(path: &Path, records: &mut Records) -> Result<Option<u64>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    let mut line_number = 0usize;
    let mut complete_len = 0u64;

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || !line.ends_with('\n') {
            break;
        }
        line_number += 1;

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            let record: WalRecord = serde_json::from_str(trimmed).map_err(|error| {
                StoreError::InvalidData(format!("invalid wal line {line_number}: {error}"))
            })?;
            records.apply(&record).map_err(|error| {
                StoreError::InvalidData(format!(
                    "failed to apply wal line {line_number}: {error}"
                ))
            })?;
        }
        complete_len += read as u64;
    }

    Ok(Some(complete_len))
}
