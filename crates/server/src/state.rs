// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use reelforge_pipeline::{JobOrchestrator, JobStore, ProgressPublisher};
use tokio::sync::watch;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job records shared with the orchestrator.
    pub store: JobStore,
    pub orchestrator: JobOrchestrator,
    /// Per-request progress subscriptions for the SSE endpoint.
    pub publisher: ProgressPublisher,
    /// Flips to `true` on graceful shutdown so SSE streams close.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Build state around an orchestrator; the store and publisher are
    /// derived from it.
    pub fn new(orchestrator: JobOrchestrator, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let store = orchestrator.store().clone();
        let publisher = ProgressPublisher::new(store.clone(), orchestrator.config());
        Arc::new(Self {
            start_time: Instant::now(),
            store,
            orchestrator,
            publisher,
            shutdown,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
