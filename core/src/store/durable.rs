//! Durability helpers shared by the WAL and the snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::StoreError;

/// Creates the directory a store file lives in.
pub(super) fn create_store_dir(file: &Path) -> Result<(), StoreError> {
    match store_dir(file) {
        Some(dir) => Ok(fs::create_dir_all(dir)?),
        None => Ok(()),
    }
}

/// Makes a create, rename or truncate of `file` survive a crash.
pub(super) fn sync_store_dir(file: &Path) -> Result<(), StoreError> {
    match store_dir(file) {
        Some(dir) => Ok(File::open(dir)?.sync_all()?),
        None => Ok(()),
    }
}

/// Replaces `file` with `bytes` so readers see either the old or the new contents.
pub(super) fn replace_file(file: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    create_store_dir(file)?;
    let staged = file.with_extension("tmp");
    let mut handle = File::create(&staged)?;
    handle.write_all(bytes)?;
    handle.sync_all()?;
    fs::rename(&staged, file)?;
    sync_store_dir(file)
}

/// Empties `file`, creating it if needed.
pub(super) fn empty_file(file: &Path) -> Result<(), StoreError> {
    create_store_dir(file)?;
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(file)?
        .sync_all()?;
    Ok(())
}

fn store_dir(file: &Path) -> Option<&Path> {
    file.parent().filter(|dir| !dir.as_os_str().is_empty())
}
