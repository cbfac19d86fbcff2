//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric descriptions for the job pipeline and the streaming endpoint
//! - A guard that tracks open progress streams
//! - The `GET /metrics` scrape route

use std::sync::{Arc, OnceLock};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Concurrent callers block until the first one has installed the recorder.
/// Returns `true` only for the call that installed it.
pub fn init_metrics() -> bool {
    let mut installed = false;
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Failed to set global metrics recorder (already set)");
        } else {
            describe_metrics();
            installed = true;
            tracing::info!("Prometheus metrics initialized");
        }
        handle
    });
    installed
}

fn describe_metrics() {
    describe_counter!(
        "reelforge_jobs_created_total",
        "Generation jobs accepted by the orchestrator"
    );
    describe_counter!(
        "reelforge_jobs_finished_total",
        "Generation jobs that reached a terminal status, by status"
    );
    describe_counter!(
        "reelforge_jobs_rejected_total",
        "Job submissions refused because the job limit was reached"
    );
    describe_gauge!(
        "reelforge_jobs_active",
        "Jobs currently queued or running"
    );
    describe_histogram!(
        "reelforge_stage_duration_seconds",
        "Wall time of each executed stage in seconds"
    );
    describe_histogram!(
        "reelforge_job_duration_seconds",
        "Wall time from execution start to terminal status in seconds"
    );
    describe_gauge!(
        "reelforge_progress_streams",
        "Open progress event streams"
    );
    describe_gauge!(
        "reelforge_jobs_tracked",
        "Jobs held in memory, finished ones included until retention evicts them"
    );
    describe_gauge!("reelforge_uptime_seconds", "Seconds since the server started");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// GET /metrics - refresh the point-in-time gauges, then render.
async fn scrape(State(state): State<Arc<AppState>>) -> Response {
    let Some(handle) = PROMETHEUS_HANDLE.get() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Metrics recorder not installed").into_response();
    };
    gauge!("reelforge_jobs_tracked").set(state.store.len() as f64);
    gauge!("reelforge_uptime_seconds").set(state.uptime_secs() as f64);

    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
        .into_response()
}

/// Scrape route, mounted at the root rather than under `/api`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}

/// Counts an open progress stream for as long as it is alive.
pub struct StreamGuard;

impl StreamGuard {
    pub fn open() -> Self {
        gauge!("reelforge_progress_streams").increment(1.0);
        Self
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        gauge!("reelforge_progress_streams").decrement(1.0);
    }
}
