use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Readiness {
    Building,
    Ready,
    Failed,
}

impl Readiness {
    fn as_u8(self) -> u8 {
        match self {
            Self::Building => 0,
            Self::Ready => 1,
            Self::Failed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Building,
            1 => Self::Ready,
            _ => Self::Failed,
        }
    }
}

/// Process-wide admission flag for enrollment and search traffic.
///
/// Readers only ever do an atomic load. Moving to `Ready` requires a
/// [`BuildTicket`], and at most one ticket exists at any time.
#[derive(Debug)]
pub(crate) struct ReadinessGate {
    state: AtomicU8,
    build_in_flight: AtomicBool,
    abort_requested: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(Readiness::Building.as_u8()),
            build_in_flight: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn readiness(&self) -> Readiness {
        Readiness::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    pub(crate) fn build_in_flight(&self) -> bool {
        self.build_in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn failure_reason(&self) -> Option<String> {
        self.failure
            .lock()
            .map(|failure| failure.clone())
            .unwrap_or_else(|_| Some("readiness state lock poisoned".to_string()))
    }

    /// Claims the single build slot and closes the gate.
    pub(crate) fn try_begin_build(self: &Arc<Self>) -> Option<BuildTicket> {
        if self.abort_requested() {
            return None;
        }
        if self
            .build_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        self.set_failure(None);
        self.state
            .store(Readiness::Building.as_u8(), Ordering::Release);
        Some(BuildTicket {
            gate: Arc::clone(self),
            finished: false,
        })
    }

    /// Moves to `Failed` outside of a build, e.g. when storage is unusable.
    pub(crate) fn force_not_ready(&self, reason: impl Into<String>) {
        self.fail(reason.into());
    }

    pub(crate) fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    fn fail(&self, reason: String) {
        self.set_failure(Some(reason));
        self.state.store(Readiness::Failed.as_u8(), Ordering::Release);
    }

    fn set_failure(&self, reason: Option<String>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = reason;
        }
    }
}

/// Exclusive right to finish the current build epoch.
#[derive(Debug)]
pub(crate) struct BuildTicket {
    gate: Arc<ReadinessGate>,
    finished: bool,
}

impl BuildTicket {
    pub(crate) fn should_abort(&self) -> bool {
        self.gate.abort_requested()
    }

    pub(crate) fn mark_ready(mut self) {
        self.finished = true;
        self.gate
            .state
            .store(Readiness::Ready.as_u8(), Ordering::Release);
    }

    pub(crate) fn mark_failed(mut self, reason: impl Into<String>) {
        self.finished = true;
        self.gate.fail(reason.into());
    }
}

impl Drop for BuildTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.fail("index build ended without completing".to_string());
        }
        self.gate.build_in_flight.store(false, Ordering::Release);
    }
}
