//! Background population of the similarity index from the record store.
//!
//! The builder reads the store in fixed-size pages, decodes each page on the
//! rayon pool and appends it to the index under a short write lock. Every
//! store read goes through the retry policy. Any failure leaves the index
//! empty and the gate in `Failed`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use facematch_core::{decode_embedding, DecodeError, Identity, IndexError, StoreError, VectorStore};
use rayon::prelude::*;
use thiserror::Error;
use tokio::task;

use crate::engine::IndexHandle;
use crate::metrics::EngineMetrics;
use crate::readiness::BuildTicket;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub(crate) enum BuildError {
    #[error("record store read failed: {0}")]
    Store(String),
    #[error("record {identity} has a corrupt embedding: {source}")]
    CorruptRecord {
        identity: Identity,
        #[source]
        source: DecodeError,
    },
    #[error("index rejected batch: {0}")]
    Index(#[from] IndexError),
    #[error("index lock poisoned")]
    LockPoisoned,
    #[error("index build aborted")]
    Aborted,
    #[error("build worker task failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BuildReport {
    pub(crate) total: usize,
    pub(crate) loaded: usize,
    pub(crate) batches: usize,
    pub(crate) elapsed: Duration,
}

pub(crate) struct IndexBuilder {
    pub(crate) store: Arc<dyn VectorStore>,
    pub(crate) index: IndexHandle,
    pub(crate) dimension: usize,
    pub(crate) batch_size: usize,
    pub(crate) batch_pause: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) metrics: EngineMetrics,
}

impl IndexBuilder {
    /// Runs one build epoch and settles the ticket with its outcome.
    pub(crate) async fn run(&self, ticket: BuildTicket) -> Result<BuildReport, BuildError> {
        let outcome = self.populate(&ticket).await;
        match &outcome {
            Ok(report) => {
                tracing::info!(
                    total = report.total,
                    loaded = report.loaded,
                    batches = report.batches,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "similarity index ready"
                );
                ticket.mark_ready();
            }
            Err(error) => {
                if let Err(clear_error) = self.clear_index().await {
                    tracing::error!(%clear_error, "failed to clear index after failed build");
                }
                self.metrics.build_failures_total.inc();
                tracing::error!(%error, "similarity index build failed");
                ticket.mark_failed(error.to_string());
            }
        }
        outcome
    }

    async fn populate(&self, ticket: &BuildTicket) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        self.clear_index().await?;

        let total = self.read_store(|store| store.count_records()).await?;
        if total == 0 {
            return Ok(BuildReport {
                total,
                loaded: 0,
                batches: 0,
                elapsed: started.elapsed(),
            });
        }

        let planned = total.div_ceil(self.batch_size);
        tracing::info!(
            total,
            batches = planned,
            batch_size = self.batch_size,
            "building similarity index"
        );

        let mut loaded = 0usize;
        let mut batches = 0usize;
        for batch in 0..planned {
            if ticket.should_abort() {
                return Err(BuildError::Aborted);
            }

            let limit = self.batch_size;
            let offset = batch * limit;
            let records = self
                .read_store(move |store| store.fetch_batch(limit, offset))
                .await?;
            if records.is_empty() {
                break;
            }

            let decoded = decode_batch(records, self.dimension).await?;
            loaded += self.append(decoded).await?;
            batches += 1;
            self.metrics.build_batches_total.inc();
            tracing::debug!(batch = batch + 1, batches = planned, loaded, "index batch loaded");

            self.pause().await;
        }

        Ok(BuildReport {
            total,
            loaded,
            batches,
            elapsed: started.elapsed(),
        })
    }

    async fn read_store<T, F>(&self, operation: F) -> Result<T, BuildError>
    where
        T: Send + 'static,
        F: Fn(&dyn VectorStore) -> Result<T, StoreError> + Clone + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        self.retry
            .run("record store read", || {
                let store = Arc::clone(&store);
                let operation = operation.clone();
                async move {
                    task::spawn_blocking(move || operation(store.as_ref()))
                        .await
                        .map_err(|error| {
                            StoreError::Unavailable(format!("store worker task failed: {error}"))
                        })?
                }
            })
            .await
            .map_err(|error| BuildError::Store(error.to_string()))
    }

    async fn append(&self, entries: Vec<(Identity, Vec<f32>)>) -> Result<usize, BuildError> {
        let index = Arc::clone(&self.index);
        task::spawn_blocking(move || {
            let mut index = index.write().map_err(|_| BuildError::LockPoisoned)?;
            Ok(index.insert_batch(&entries)?)
        })
        .await
        .map_err(|error| BuildError::Worker(error.to_string()))?
    }

    async fn clear_index(&self) -> Result<(), BuildError> {
        let index = Arc::clone(&self.index);
        task::spawn_blocking(move || {
            index.write().map_err(|_| BuildError::LockPoisoned)?.clear();
            Ok(())
        })
        .await
        .map_err(|error| BuildError::Worker(error.to_string()))?
    }

    async fn pause(&self) {
        if self.batch_pause.is_zero() {
            task::yield_now().await;
        } else {
            tokio::time::sleep(self.batch_pause).await;
        }
    }
}

async fn decode_batch(
    records: Vec<(Identity, Vec<u8>)>,
    dimension: usize,
) -> Result<Vec<(Identity, Vec<f32>)>, BuildError> {
    task::spawn_blocking(move || {
        records
            .into_par_iter()
            .map(|(identity, bytes)| {
                decode_embedding(&bytes, dimension)
                    .map(|values| (identity, values))
                    .map_err(|source| BuildError::CorruptRecord { identity, source })
            })
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|error| BuildError::Worker(error.to_string()))?
}

#[cfg(test)]
mod tests;
