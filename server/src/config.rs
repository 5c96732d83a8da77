use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::env_utils::parse_bool_env;

const EMBEDDING_DIMENSION_DEFAULT: usize = 512;
const MATCH_THRESHOLD_DEFAULT: f32 = 0.8;
const REBUILD_BATCH_SIZE_DEFAULT: usize = 1_000;
const REBUILD_BATCH_PAUSE_MS_DEFAULT: u64 = 10;
const STORE_RETRY_ATTEMPTS_DEFAULT: u32 = 3;
const STORE_RETRY_DELAY_MS_DEFAULT: u64 = 500;

#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) bind: SocketAddr,
    pub(crate) embedding_dimension: usize,
    /// Squared L2 distance boundary shared by enrollment and search.
    pub(crate) match_threshold: f32,
    pub(crate) rebuild_batch_size: usize,
    pub(crate) rebuild_batch_pause_ms: u64,
    pub(crate) store_retry_attempts: u32,
    pub(crate) store_retry_delay_ms: u64,
    pub(crate) request_timeout_ms: u64,
    pub(crate) max_body_bytes: usize,
    pub(crate) max_concurrency: usize,
    pub(crate) persistence_enabled: bool,
    pub(crate) wal_sync_on_write: bool,
    pub(crate) checkpoint_interval: usize,
    pub(crate) snapshot_path: PathBuf,
    pub(crate) wal_path: PathBuf,
}

impl AppConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let bind = parse_socket_addr("FACEMATCH_BIND", "0.0.0.0:8000")?;
        let embedding_dimension =
            parse_usize("FACEMATCH_EMBEDDING_DIMENSION", EMBEDDING_DIMENSION_DEFAULT)?;
        let match_threshold = parse_f32("FACEMATCH_MATCH_THRESHOLD", MATCH_THRESHOLD_DEFAULT)?;
        let rebuild_batch_size =
            parse_usize("FACEMATCH_REBUILD_BATCH_SIZE", REBUILD_BATCH_SIZE_DEFAULT)?;
        let rebuild_batch_pause_ms = parse_u64(
            "FACEMATCH_REBUILD_BATCH_PAUSE_MS",
            REBUILD_BATCH_PAUSE_MS_DEFAULT,
        )?;
        let store_retry_attempts =
            parse_u32("FACEMATCH_STORE_RETRY_ATTEMPTS", STORE_RETRY_ATTEMPTS_DEFAULT)?;
        let store_retry_delay_ms =
            parse_u64("FACEMATCH_STORE_RETRY_DELAY_MS", STORE_RETRY_DELAY_MS_DEFAULT)?;
        let request_timeout_ms = parse_u64("FACEMATCH_REQUEST_TIMEOUT_MS", 5_000)?;
        let max_body_bytes = parse_usize("FACEMATCH_MAX_BODY_BYTES", 1_048_576)?;
        let max_concurrency = parse_usize("FACEMATCH_MAX_CONCURRENCY", 256)?;
        let persistence_enabled = parse_bool_env("FACEMATCH_PERSISTENCE_ENABLED", true)?;
        let wal_sync_on_write = parse_bool_env("FACEMATCH_WAL_SYNC_ON_WRITE", true)?;
        let checkpoint_interval = parse_usize("FACEMATCH_CHECKPOINT_INTERVAL", 32)?;
        let snapshot_path = parse_path("FACEMATCH_SNAPSHOT_PATH", "db/users_snapshot.json")?;
        let wal_path = parse_path("FACEMATCH_WAL_PATH", "db/users_wal.jsonl")?;

        if embedding_dimension == 0 {
            anyhow::bail!("FACEMATCH_EMBEDDING_DIMENSION must be > 0");
        }
        if !match_threshold.is_finite() || match_threshold < 0.0 {
            anyhow::bail!("FACEMATCH_MATCH_THRESHOLD must be a finite value >= 0");
        }
        if rebuild_batch_size == 0 {
            anyhow::bail!("FACEMATCH_REBUILD_BATCH_SIZE must be > 0");
        }
        if store_retry_attempts == 0 {
            anyhow::bail!("FACEMATCH_STORE_RETRY_ATTEMPTS must be > 0");
        }
        if max_body_bytes == 0 {
            anyhow::bail!("FACEMATCH_MAX_BODY_BYTES must be > 0");
        }
        if max_concurrency == 0 {
            anyhow::bail!("FACEMATCH_MAX_CONCURRENCY must be > 0");
        }
        if checkpoint_interval == 0 {
            anyhow::bail!("FACEMATCH_CHECKPOINT_INTERVAL must be > 0");
        }

        Ok(Self {
            bind,
            embedding_dimension,
            match_threshold,
            rebuild_batch_size,
            rebuild_batch_pause_ms,
            store_retry_attempts,
            store_retry_delay_ms,
            request_timeout_ms,
            max_body_bytes,
            max_concurrency,
            persistence_enabled,
            wal_sync_on_write,
            checkpoint_interval,
            snapshot_path,
            wal_path,
        })
    }
}

fn parse_socket_addr(key: &str, default: &str) -> Result<SocketAddr> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a valid socket address, got '{raw}'"))
}

fn parse_usize(key: &str, default: usize) -> Result<usize> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a positive integer, got '{raw}'"))
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a positive integer, got '{raw}'"))
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a positive integer, got '{raw}'"))
}

fn parse_f32(key: &str, default: f32) -> Result<f32> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a number, got '{raw}'"))
}

fn parse_path(key: &str, default: &str) -> Result<PathBuf> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    let path = PathBuf::from(raw);
    if path.as_os_str().is_empty() {
        anyhow::bail!("{key} must not be empty");
    }
    Ok(path)
}
