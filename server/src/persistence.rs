use facematch_core::{Identity, RecordStore, StoreError, StoreOptions, StorePaths, VectorStore};
use tokio::task;

use crate::config::AppConfig;
use crate::retry::{RetryError, RetryPolicy};

pub(crate) fn store_options(config: &AppConfig) -> StoreOptions {
    if !config.persistence_enabled {
        return StoreOptions::in_memory();
    }
    StoreOptions {
        paths: Some(StorePaths {
            snapshot_path: config.snapshot_path.clone(),
            wal_path: config.wal_path.clone(),
        }),
        sync_on_write: config.wal_sync_on_write,
        checkpoint_interval: config.checkpoint_interval,
    }
}

/// Opens the record store, replaying snapshot and WAL, under the retry policy.
pub(crate) async fn open_store(
    options: StoreOptions,
    retry: RetryPolicy,
) -> Result<RecordStore, RetryError<StoreError>> {
    retry
        .run("open record store", || {
            let options = options.clone();
            async move {
                task::spawn_blocking(move || RecordStore::open(options))
                    .await
                    .map_err(|error| {
                        StoreError::Unavailable(format!("store open task failed: {error}"))
                    })?
            }
        })
        .await
}

/// Stand-in used when the record store could not be opened at startup.
///
/// Keeps the process serving health and metrics while every store call fails.
#[derive(Debug)]
pub(crate) struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> StoreError {
        StoreError::Unavailable(self.reason.clone())
    }
}

impl VectorStore for UnavailableStore {
    fn count_records(&self) -> Result<usize, StoreError> {
        Err(self.error())
    }

    fn fetch_batch(
        &self,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<(Identity, Vec<u8>)>, StoreError> {
        Err(self.error())
    }

    fn insert_record(&self, _label: &str, _embedding: &[u8]) -> Result<Identity, StoreError> {
        Err(self.error())
    }

    fn delete_record(&self, _identity: Identity) -> Result<bool, StoreError> {
        Err(self.error())
    }

    fn lookup_label(&self, _identity: Identity) -> Result<Option<String>, StoreError> {
        Err(self.error())
    }

    fn find_identity(&self, _label: &str) -> Result<Option<Identity>, StoreError> {
        Err(self.error())
    }
}
