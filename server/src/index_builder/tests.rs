use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use facematch_core::{encode_embedding, RecordStore, SimilarityIndex};

use super::*;
use crate::readiness::{Readiness, ReadinessGate};

const DIMENSION: usize = 4;

fn unit(axis: usize, scale: f32) -> Vec<f32> {
    let mut values = vec![0.0; DIMENSION];
    values[axis % DIMENSION] = 1.0;
    values[(axis + 1) % DIMENSION] = scale;
    let norm = (1.0 + scale * scale).sqrt();
    values.iter().map(|value| value / norm).collect()
}

fn builder(store: Arc<dyn VectorStore>, batch_size: usize, attempts: u32) -> IndexBuilder {
    IndexBuilder {
        store,
        index: Arc::new(RwLock::new(
            SimilarityIndex::new(DIMENSION).expect("index must build"),
        )),
        dimension: DIMENSION,
        batch_size,
        batch_pause: Duration::ZERO,
        retry: RetryPolicy::new(attempts, Duration::ZERO),
        metrics: EngineMetrics::new().expect("metrics must register"),
    }
}

fn seeded_store(count: usize) -> Arc<RecordStore> {
    let store = Arc::new(RecordStore::in_memory());
    for i in 0..count {
        store
            .insert_record(&format!("user-{i}"), &encode_embedding(&unit(i, i as f32 * 0.1)))
            .expect("seed insert must succeed");
    }
    store
}

/// Wraps a store and fails the first `failures` count calls.
struct FlakyStore {
    inner: RecordStore,
    failures: u32,
    calls: AtomicU32,
}

impl VectorStore for FlakyStore {
    fn count_records(&self) -> Result<usize, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if call < self.failures {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.count_records()
    }

    fn fetch_batch(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Identity, Vec<u8>)>, StoreError> {
        self.inner.fetch_batch(limit, offset)
    }

    fn insert_record(&self, label: &str, embedding: &[u8]) -> Result<Identity, StoreError> {
        self.inner.insert_record(label, embedding)
    }

    fn delete_record(&self, identity: Identity) -> Result<bool, StoreError> {
        self.inner.delete_record(identity)
    }

    fn lookup_label(&self, identity: Identity) -> Result<Option<String>, StoreError> {
        self.inner.lookup_label(identity)
    }

    fn find_identity(&self, label: &str) -> Result<Option<Identity>, StoreError> {
        self.inner.find_identity(label)
    }
}

#[tokio::test]
async fn loads_every_record_in_batches_and_opens_gate() {
    let store = seeded_store(7);
    let builder = builder(store, 3, 1);
    let gate = Arc::new(ReadinessGate::new());

    let report = builder
        .run(gate.try_begin_build().expect("build must start"))
        .await
        .expect("build must succeed");

    assert_eq!(report.total, 7);
    assert_eq!(report.loaded, 7);
    assert_eq!(report.batches, 3);
    assert!(gate.is_ready());

    let index = builder.index.read().expect("index lock");
    assert_eq!(index.len(), 7);
    for identity in 1..=7 {
        assert!(index.contains(identity));
    }
    let nearest = index
        .search(&unit(2, 0.2), 1)
        .expect("search must succeed");
    assert_eq!(nearest[0].identity, 3);
    assert!(nearest[0].distance.abs() < 1e-6);
}

#[tokio::test]
async fn empty_store_becomes_ready_immediately() {
    let builder = builder(Arc::new(RecordStore::in_memory()), 10, 1);
    let gate = Arc::new(ReadinessGate::new());

    let report = builder
        .run(gate.try_begin_build().expect("build must start"))
        .await
        .expect("build must succeed");

    assert_eq!(report.loaded, 0);
    assert_eq!(report.batches, 0);
    assert!(gate.is_ready());
    assert!(builder.index.read().expect("index lock").is_empty());
}

#[tokio::test]
async fn rebuild_replaces_previous_contents() {
    let store = seeded_store(4);
    let builder = builder(store.clone(), 2, 1);
    let gate = Arc::new(ReadinessGate::new());

    builder
        .run(gate.try_begin_build().expect("build must start"))
        .await
        .expect("first build must succeed");
    store.delete_record(2).expect("delete must succeed");
    builder
        .run(gate.try_begin_build().expect("rebuild must start"))
        .await
        .expect("rebuild must succeed");

    let index = builder.index.read().expect("index lock");
    assert_eq!(index.len(), 3);
    assert!(!index.contains(2));
}

#[tokio::test]
async fn corrupt_record_fails_build_and_leaves_index_empty() {
    let store = seeded_store(3);
    store
        .insert_record("broken", &[0u8; 5])
        .expect("raw insert must succeed");
    let builder = builder(store, 2, 1);
    let gate = Arc::new(ReadinessGate::new());

    let error = builder
        .run(gate.try_begin_build().expect("build must start"))
        .await
        .expect_err("corrupt record must fail the build");

    assert!(matches!(error, BuildError::CorruptRecord { identity: 4, .. }));
    assert_eq!(gate.readiness(), Readiness::Failed);
    assert!(gate
        .failure_reason()
        .is_some_and(|reason| reason.contains("record 4")));
    assert!(builder.index.read().expect("index lock").is_empty());
    assert_eq!(builder.metrics.build_failures_total.get(), 1);
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let inner = RecordStore::in_memory();
    inner
        .insert_record("alice", &encode_embedding(&unit(0, 0.0)))
        .expect("seed insert must succeed");
    let store = Arc::new(FlakyStore {
        inner,
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let builder = builder(store.clone(), 10, 3);
    let gate = Arc::new(ReadinessGate::new());

    let report = builder
        .run(gate.try_begin_build().expect("build must start"))
        .await
        .expect("third attempt must succeed");

    assert_eq!(report.loaded, 1);
    assert_eq!(store.calls.load(Ordering::Relaxed), 3);
    assert!(gate.is_ready());
}

#[tokio::test]
async fn exhausted_retries_fail_the_gate() {
    let store = Arc::new(FlakyStore {
        inner: RecordStore::in_memory(),
        failures: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let builder = builder(store.clone(), 10, 2);
    let gate = Arc::new(ReadinessGate::new());

    let error = builder
        .run(gate.try_begin_build().expect("build must start"))
        .await
        .expect_err("build must fail");

    assert!(matches!(error, BuildError::Store(_)));
    assert_eq!(store.calls.load(Ordering::Relaxed), 2);
    assert_eq!(gate.readiness(), Readiness::Failed);
}

#[tokio::test]
async fn abort_request_stops_build() {
    let builder = builder(seeded_store(5), 2, 1);
    let gate = Arc::new(ReadinessGate::new());
    let ticket = gate.try_begin_build().expect("build must start");
    gate.request_abort();

    let error = builder.run(ticket).await.expect_err("build must abort");

    assert!(matches!(error, BuildError::Aborted));
    assert_eq!(gate.readiness(), Readiness::Failed);
    assert!(builder.index.read().expect("index lock").is_empty());
}
