//! Health check logic

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

/// Lifecycle state reported by the probes
///
/// The server starts out not ready. The `Ready` hook marks it ready once
/// every module is initialized, and shutdown marks it stopping, after which
/// it never reports ready again.
#[derive(Debug)]
pub struct HealthChecker {
    ready: AtomicBool,
    stopping: AtomicBool,
    started: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Readiness updated");
    }

    /// Shutdown has begun
    pub fn set_stopping(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        tracing::debug!("Readiness withdrawn for shutdown");
    }

    /// For liveness, responding at all is enough.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed) && !self.stopping.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            alive: self.is_alive(),
            ready: self.is_ready(),
            stopping: self.stopping.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Body of a failed readiness probe
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub stopping: bool,
    pub uptime_secs: u64,
}
