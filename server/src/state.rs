use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::engine::IdentityEngine;

pub(crate) struct AppState {
    pub(crate) started_at: Instant,
    pub(crate) config: Arc<AppConfig>,
    pub(crate) engine: Arc<IdentityEngine>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            started_at: self.started_at,
            config: Arc::clone(&self.config),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl AppState {
    pub(crate) fn new(config: AppConfig, engine: IdentityEngine) -> Self {
        Self {
            started_at: Instant::now(),
            config: Arc::new(config),
            engine: Arc::new(engine),
        }
    }

    pub(crate) fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
