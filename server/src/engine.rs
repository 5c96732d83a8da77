//! Enrollment, identification and deletion over the record store and the
//! in-memory similarity index.
//!
//! The store is authoritative. Every mutation commits to the store first and
//! is then mirrored into the index on the same blocking worker; a mirror
//! failure after a committed write is surfaced as
//! [`EngineError::StoreInconsistency`] and the index is only trusted again
//! after a rebuild. Mutations and builds are serialized through
//! one semaphore permit, so an enrollment can never observe a half-built index.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use facematch_core::{
    encode_embedding, normalize_l2, validate_embedding, EnrollDecision, Identity, IndexError,
    MatchPolicy, Neighbor, QueryDecision, SimilarityIndex, StoreError, VectorStore,
    VectorValidationOptions,
};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{self, JoinHandle};

use crate::index_builder::IndexBuilder;
use crate::metrics::EngineMetrics;
use crate::readiness::{Readiness, ReadinessGate};
use crate::retry::RetryPolicy;

pub(crate) type IndexHandle = Arc<RwLock<SimilarityIndex>>;

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("label must not be empty")]
    InvalidLabel,
    #[error("similar face already enrolled as identity {identity} (distance {distance})")]
    DuplicateEmbedding { identity: Identity, distance: f32 },
    #[error("label '{0}' is already enrolled")]
    DuplicateLabel(String),
    #[error("index is not ready")]
    NotReady,
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("an index build is already in progress")]
    BuildInProgress,
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("store committed identity {identity} but the index was not updated: {reason}")]
    StoreInconsistency { identity: Identity, reason: String },
    #[error("record store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateLabel(label) => Self::DuplicateLabel(label),
            StoreError::InvalidLabel => Self::InvalidLabel,
            other => Self::Store(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QueryOutcome {
    Match {
        identity: Identity,
        label: String,
        distance: f32,
    },
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Deleted {
    pub(crate) identity: Identity,
    pub(crate) label: String,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineSettings {
    pub(crate) dimension: usize,
    pub(crate) match_threshold: f32,
    pub(crate) validation: VectorValidationOptions,
    pub(crate) rebuild_batch_size: usize,
    pub(crate) rebuild_batch_pause: Duration,
    pub(crate) store_retry: RetryPolicy,
}

pub(crate) struct IdentityEngine {
    dimension: usize,
    policy: MatchPolicy,
    validation: VectorValidationOptions,
    index: IndexHandle,
    store: Arc<dyn VectorStore>,
    gate: Arc<ReadinessGate>,
    mutations: Arc<Semaphore>,
    builder: Arc<IndexBuilder>,
    metrics: EngineMetrics,
}

impl IdentityEngine {
    pub(crate) fn new(
        settings: EngineSettings,
        store: Arc<dyn VectorStore>,
        metrics: EngineMetrics,
    ) -> Result<Self, EngineError> {
        let index = SimilarityIndex::new(settings.dimension)
            .map_err(|error| EngineError::Internal(error.to_string()))?;
        let policy = MatchPolicy::new(settings.match_threshold)
            .map_err(|error| EngineError::Internal(error.to_string()))?;
        if settings.rebuild_batch_size == 0 {
            return Err(EngineError::Internal(
                "rebuild batch size must be > 0".to_string(),
            ));
        }

        let index = Arc::new(RwLock::new(index));
        let builder = Arc::new(IndexBuilder {
            store: Arc::clone(&store),
            index: Arc::clone(&index),
            dimension: settings.dimension,
            batch_size: settings.rebuild_batch_size,
            batch_pause: settings.rebuild_batch_pause,
            retry: settings.store_retry,
            metrics: metrics.clone(),
        });

        Ok(Self {
            dimension: settings.dimension,
            policy,
            validation: settings.validation,
            index,
            store,
            gate: Arc::new(ReadinessGate::new()),
            mutations: Arc::new(Semaphore::new(1)),
            builder,
            metrics,
        })
    }

    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub(crate) fn readiness(&self) -> Readiness {
        self.gate.readiness()
    }

    pub(crate) fn build_in_flight(&self) -> bool {
        self.gate.build_in_flight()
    }

    pub(crate) fn failure_reason(&self) -> Option<String> {
        self.gate.failure_reason()
    }

    pub(crate) fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub(crate) fn index_len(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    /// Marks the engine unusable without a build, e.g. when storage could not be opened.
    pub(crate) fn force_not_ready(&self, reason: impl Into<String>) {
        self.gate.force_not_ready(reason);
    }

    /// Stops in-flight builds at the next batch boundary and refuses new ones.
    pub(crate) fn request_shutdown(&self) {
        self.gate.request_abort();
    }

    /// Starts a background build epoch.
    ///
    /// The index is emptied and the gate closed until the build settles.
    /// Returns [`EngineError::BuildInProgress`] when another build holds the slot.
    pub(crate) fn begin_rebuild(&self) -> Result<JoinHandle<()>, EngineError> {
        if self.gate.abort_requested() {
            return Err(EngineError::ShuttingDown);
        }
        let ticket = self
            .gate
            .try_begin_build()
            .ok_or(EngineError::BuildInProgress)?;
        let builder = Arc::clone(&self.builder);
        let mutations = Arc::clone(&self.mutations);

        Ok(tokio::spawn(async move {
            let _permit = match mutations.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    ticket.mark_failed("mutation lane closed");
                    return;
                }
            };
            // Outcome is logged and recorded on the gate by the builder.
            let _ = builder.run(ticket).await;
        }))
    }

    /// Enrolls `label` unless a similar face is already present.
    pub(crate) async fn enroll(
        &self,
        label: &str,
        embedding: &[f32],
    ) -> Result<Identity, EngineError> {
        self.admit()?;
        if label.trim().is_empty() {
            return Err(EngineError::InvalidLabel);
        }
        let normalized = self.prepare_embedding(embedding)?;

        let permit = self.acquire_mutation_permit().await?;
        // A rebuild may have started while this request waited for the lane.
        self.admit()?;

        let (nearest, normalized) = self.nearest(normalized).await?;
        if let EnrollDecision::Duplicate(neighbor) = self.policy.enrollment_decision(nearest) {
            self.metrics.duplicate_rejections_total.inc();
            tracing::info!(
                label,
                existing_identity = neighbor.identity,
                distance = neighbor.distance,
                "enrollment rejected as duplicate"
            );
            return Err(EngineError::DuplicateEmbedding {
                identity: neighbor.identity,
                distance: neighbor.distance,
            });
        }

        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        let metrics = self.metrics.clone();
        let owned_label = label.to_string();
        // Commit and mirror share one blocking task that owns the permit, so a
        // dropped request future cannot separate them.
        run_blocking(move || {
            let _permit = permit;
            let identity = store.insert_record(&owned_label, &encode_embedding(&normalized))?;
            mirror(&index, &metrics, identity, |index| {
                index.insert_unique(identity, &normalized)
            })?;

            metrics.enrollments_total.inc();
            tracing::info!(identity, label = %owned_label, "identity enrolled");
            Ok(identity)
        })
        .await
    }

    /// Resolves the closest enrolled identity within the match threshold.
    pub(crate) async fn query(&self, embedding: &[f32]) -> Result<QueryOutcome, EngineError> {
        self.admit()?;
        let normalized = self.prepare_embedding(embedding)?;
        self.metrics.queries_total.inc();

        let (nearest, _) = self.nearest(normalized).await?;
        let neighbor = match self.policy.query_decision(nearest) {
            QueryDecision::Match(neighbor) => neighbor,
            QueryDecision::NoMatch => return Ok(QueryOutcome::NoMatch),
        };

        let store = Arc::clone(&self.store);
        let identity = neighbor.identity;
        match run_blocking(move || Ok(store.lookup_label(identity)?)).await? {
            Some(label) => {
                self.metrics.matches_total.inc();
                Ok(QueryOutcome::Match {
                    identity,
                    label,
                    distance: neighbor.distance,
                })
            }
            None => {
                tracing::warn!(identity, "index entry has no backing store record");
                Ok(QueryOutcome::NoMatch)
            }
        }
    }

    /// Removes `label` from the store and then from the index.
    pub(crate) async fn delete(&self, label: &str) -> Result<Deleted, EngineError> {
        self.admit()?;
        if label.trim().is_empty() {
            return Err(EngineError::InvalidLabel);
        }

        let permit = self.acquire_mutation_permit().await?;
        self.admit()?;

        let store = Arc::clone(&self.store);
        let owned_label = label.to_string();
        let identity = run_blocking(move || Ok(store.find_identity(&owned_label)?))
            .await?
            .ok_or_else(|| EngineError::NotFound(label.to_string()))?;

        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        let metrics = self.metrics.clone();
        let removed = run_blocking(move || {
            let _permit = permit;
            if !store.delete_record(identity)? {
                return Ok(false);
            }
            mirror(&index, &metrics, identity, |index| {
                index.remove(identity);
                Ok(())
            })?;
            metrics.deletions_total.inc();
            Ok(true)
        })
        .await?;
        if !removed {
            return Err(EngineError::NotFound(label.to_string()));
        }

        tracing::info!(identity, label, "identity deleted");
        Ok(Deleted {
            identity,
            label: label.to_string(),
        })
    }

    fn admit(&self) -> Result<(), EngineError> {
        if self.gate.is_ready() {
            return Ok(());
        }
        self.metrics.not_ready_rejections_total.inc();
        Err(EngineError::NotReady)
    }

    fn prepare_embedding(&self, embedding: &[f32]) -> Result<Vec<f32>, EngineError> {
        validate_embedding(embedding, self.dimension, self.validation)
            .and_then(|()| normalize_l2(embedding, self.validation))
            .map_err(|error| EngineError::InvalidEmbedding(error.to_string()))
    }

    async fn acquire_mutation_permit(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        Arc::clone(&self.mutations)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("mutation lane closed".to_string()))
    }

    /// Nearest neighbor of an already-normalized query; hands the query back.
    async fn nearest(
        &self,
        query: Vec<f32>,
    ) -> Result<(Option<Neighbor>, Vec<f32>), EngineError> {
        let index = Arc::clone(&self.index);
        run_blocking(move || {
            let nearest = index
                .read()
                .map_err(|_| EngineError::Internal("index lock poisoned".to_string()))?
                .search(&query, 1)
                .map_err(|error| EngineError::Internal(error.to_string()))?
                .into_iter()
                .next();
            Ok((nearest, query))
        })
        .await
    }
}

/// Applies a committed store change to the index.
///
/// Any failure leaves the index stale for `identity` until the next rebuild.
fn mirror<F>(
    index: &RwLock<SimilarityIndex>,
    metrics: &EngineMetrics,
    identity: Identity,
    operation: F,
) -> Result<(), EngineError>
where
    F: FnOnce(&mut SimilarityIndex) -> Result<(), IndexError>,
{
    let outcome = match index.write() {
        Ok(mut guard) => operation(&mut *guard).map_err(|error| error.to_string()),
        Err(_) => Err("index lock poisoned".to_string()),
    };

    outcome.map_err(|reason| {
        metrics.store_inconsistencies_total.inc();
        tracing::error!(identity, %reason, "index mirror failed after store commit");
        EngineError::StoreInconsistency { identity, reason }
    })
}

async fn run_blocking<T>(
    operation: impl FnOnce() -> Result<T, EngineError> + Send + 'static,
) -> Result<T, EngineError>
where
    T: Send + 'static,
{
    task::spawn_blocking(operation)
        .await
        .map_err(|_| EngineError::Internal("engine worker task failed".to_string()))?
}
