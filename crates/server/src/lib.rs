// crates/server/src/lib.rs
//! Reelforge server library.
//!
//! Axum HTTP surface over the generation pipeline: job creation, status,
//! live progress streaming, cancellation and output download.

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use reelforge_pipeline::JobStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs) and the Prometheus endpoint
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_routes(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Periodically drop finished jobs older than `retention`.
///
/// Stops when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_retention_sweeper(
    store: JobStore,
    retention: Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let evicted = store.evict_terminal_older_than(retention);
            if evicted > 0 {
                tracing::info!(evicted, remaining = store.len(), "Evicted finished jobs");
            }
        }
        tracing::debug!("Retention sweeper stopped");
    })
}
