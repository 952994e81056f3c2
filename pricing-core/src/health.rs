//! Service readiness reporting for the health endpoint.

use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for notifying and querying service readiness.
#[cfg_attr(test, mockall::automock)]
pub trait HealthReporting: Send + Sync + 'static {
    /// Called once all artefacts are loaded and the HTTP server is about to
    /// accept traffic.
    fn notify_ready(&self);

    /// Whether the service is ready to serve requests.
    fn is_ready(&self) -> bool;
}

/// Readiness latch backed by an atomic flag, shared with the HTTP surface.
#[derive(Debug, Default)]
pub struct HttpHealthEndpoint {
    ready: AtomicBool,
}

impl HttpHealthEndpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HealthReporting for HttpHealthEndpoint {
    fn notify_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
