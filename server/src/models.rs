use facematch_core::Identity;
use serde::{Deserialize, Serialize};

use crate::readiness::Readiness;

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterRequest {
    pub(crate) label: String,
    pub(crate) embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterResponse {
    pub(crate) identity: Identity,
    pub(crate) label: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchRequest {
    pub(crate) embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchResponse {
    pub(crate) matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) distance: Option<f32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteResponse {
    pub(crate) identity: Identity,
    pub(crate) label: String,
    pub(crate) deleted: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RebuildResponse {
    pub(crate) status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LiveResponse {
    pub(crate) status: &'static str,
    pub(crate) uptime_ms: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadyChecks {
    pub(crate) readiness: Readiness,
    pub(crate) build_in_flight: bool,
    pub(crate) index_entries: usize,
    pub(crate) embedding_dimension: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) failure: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadyResponse {
    pub(crate) status: &'static str,
    pub(crate) uptime_ms: u64,
    pub(crate) checks: ReadyChecks,
}
