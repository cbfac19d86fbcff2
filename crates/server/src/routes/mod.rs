//! API route handlers for the reelforge server.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::metrics;
use crate::state::AppState;

/// Create the combined router: JSON API under `/api`, Prometheus at `/metrics`.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/jobs - Create and start a generation job
/// - GET  /api/jobs - List tracked jobs
/// - GET  /api/jobs/{id} - Job status
/// - GET  /api/jobs/{id}/stream - SSE stream of job progress
/// - POST /api/jobs/{id}/cancel - Request cancellation
/// - GET  /api/jobs/{id}/artifacts - Output reference and artifact list
/// - GET  /api/jobs/{id}/download - Download the final output
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .merge(metrics::router())
        .with_state(state)
}
