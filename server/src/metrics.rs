use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

const NAMESPACE: &str = "facematch";

#[derive(Debug, Error)]
pub(crate) enum MetricsError {
    #[error("failed to encode prometheus payload: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("prometheus payload is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Counters and gauges exported on `/metrics`.
#[derive(Clone)]
pub(crate) struct EngineMetrics {
    registry: Registry,
    pub(crate) enrollments_total: IntCounter,
    pub(crate) duplicate_rejections_total: IntCounter,
    pub(crate) queries_total: IntCounter,
    pub(crate) matches_total: IntCounter,
    pub(crate) deletions_total: IntCounter,
    pub(crate) not_ready_rejections_total: IntCounter,
    pub(crate) store_inconsistencies_total: IntCounter,
    pub(crate) build_batches_total: IntCounter,
    pub(crate) build_failures_total: IntCounter,
    index_entries: IntGauge,
    ready: IntGauge,
}

impl EngineMetrics {
    pub(crate) fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        Ok(Self {
            enrollments_total: counter(
                &registry,
                "enrollments_total",
                "Identities successfully enrolled.",
            )?,
            duplicate_rejections_total: counter(
                &registry,
                "duplicate_rejections_total",
                "Enrollments rejected because a similar face already exists.",
            )?,
            queries_total: counter(&registry, "queries_total", "Identification queries served.")?,
            matches_total: counter(
                &registry,
                "matches_total",
                "Identification queries that resolved to an identity.",
            )?,
            deletions_total: counter(&registry, "deletions_total", "Identities deleted.")?,
            not_ready_rejections_total: counter(
                &registry,
                "not_ready_rejections_total",
                "Requests rejected while the index was not ready.",
            )?,
            store_inconsistencies_total: counter(
                &registry,
                "store_inconsistencies_total",
                "Index mirror failures after a committed store write.",
            )?,
            build_batches_total: counter(
                &registry,
                "index_build_batches_total",
                "Record batches loaded into the index by the builder.",
            )?,
            build_failures_total: counter(
                &registry,
                "index_build_failures_total",
                "Index builds that ended in the failed state.",
            )?,
            index_entries: gauge(&registry, "index_entries", "Entries in the similarity index.")?,
            ready: gauge(&registry, "ready", "Index readiness flag (1 ready, 0 not ready).")?,
            registry,
        })
    }

    pub(crate) fn render(&self, ready: bool, index_entries: usize) -> Result<String, MetricsError> {
        self.ready.set(i64::from(ready));
        self.index_entries
            .set(i64::try_from(index_entries).unwrap_or(i64::MAX));

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}
