// crates/server/src/routes/jobs.rs
//! API routes for generation jobs.
//!
//! - POST /jobs                  - Validate, create and start a job (202)
//! - GET  /jobs                  - List tracked jobs, newest first
//! - GET  /jobs/{id}             - Job status snapshot
//! - GET  /jobs/{id}/stream      - SSE stream of progress events
//! - POST /jobs/{id}/cancel      - Request cooperative cancellation
//! - GET  /jobs/{id}/artifacts   - Output reference and produced files
//! - GET  /jobs/{id}/download    - Stream the final output file

use std::convert::Infallible;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reelforge_pipeline::{
    Artifact, Brief, EventKind, Job, JobStatus, PipelineError, PlanSpec, ProgressEvent,
    RenderSpec, Stage, VoiceSpec,
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::metrics::StreamGuard;
use crate::state::AppState;

/// Header callers may use to supply their own correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// POST /api/jobs request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub brief: Brief,
    pub plan: PlanSpec,
    pub voice: VoiceSpec,
    pub render: RenderSpec,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(Deserialize))]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub correlation_id: String,
    pub status_url: String,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub output_ref: Option<String>,
    pub correlation_id: String,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            output_ref: job.output_path.as_ref().map(|p| p.display().to_string()),
            job_id: job.id,
            status: job.status,
            percent: job.percent,
            stage: job.stage,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
            correlation_id: job.correlation_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub cancel_requested: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(Deserialize))]
pub struct ArtifactsResponse {
    pub job_id: String,
    pub output_ref: String,
    pub artifacts: Vec<Artifact>,
}

/// POST /api/jobs - Create a job and start it in the background.
async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let correlation_id = body
        .correlation_id
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            headers
                .get(CORRELATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|c| !c.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let job = state.orchestrator.create_and_start(
        body.brief,
        body.plan,
        body.voice,
        body.render,
        correlation_id,
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            status_url: format!("/api/jobs/{}", job.id),
            stream_url: format!("/api/jobs/{}/stream", job.id),
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            correlation_id: job.correlation_id,
        }),
    ))
}

/// GET /api/jobs - List all tracked jobs.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobStatusResponse>> {
    Json(
        state
            .store
            .list()
            .into_iter()
            .map(JobStatusResponse::from)
            .collect(),
    )
}

/// GET /api/jobs/{id} - Status snapshot.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    Ok(Json(state.orchestrator.get(&id)?.into()))
}

/// GET /api/jobs/{id}/stream - SSE stream of progress events.
///
/// Ends after the terminal `done`/`error` event, or when the server shuts
/// down. Heartbeats are sent as SSE comments.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let events = state.publisher.subscribe(&id)?;
    let mut shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = StreamGuard::open();
        let mut events = std::pin::pin!(events);
        if *shutdown.borrow() {
            return;
        }
        let mut shutdown_open = true;

        loop {
            let next = tokio::select! {
                event = events.next() => event,
                changed = shutdown.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => break,
                        Ok(()) => {}
                        Err(_) => shutdown_open = false,
                    }
                    continue;
                }
            };
            let Some(event) = next else { break };

            if let Some(sse) = to_sse(&event) {
                yield Ok(sse);
            }
            if event.is_terminal() {
                break;
            }
        }
        tracing::debug!(job_id = %id, "Progress stream closed");
    };

    Ok(Sse::new(stream))
}

fn to_sse(event: &ProgressEvent) -> Option<Event> {
    if event.kind == EventKind::Heartbeat {
        return Some(Event::default().comment("keepalive"));
    }
    match Event::default().event(event.event_name()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!(error = %e, job_id = %event.job_id, "Failed to serialize SSE event");
            None
        }
    }
}

/// POST /api/jobs/{id}/cancel - Request cancellation.
///
/// The transition to `canceled` happens asynchronously; poll the status or
/// watch the stream for the terminal event.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job = state.orchestrator.get(&id)?;
    if job.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Job {id} already finished with status {}",
            job.status
        )));
    }
    if !state.orchestrator.cancel_job(&id)? {
        return Err(ApiError::Conflict(format!(
            "Job {id} is already canceling or finishing"
        )));
    }

    Ok(Json(CancelResponse {
        job_id: job.id,
        status: job.status,
        cancel_requested: true,
    }))
}

/// GET /api/jobs/{id}/artifacts - Output reference and artifact list.
async fn job_artifacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ArtifactsResponse>> {
    let (job, path) = state.orchestrator.output_file(&id).await?;
    Ok(Json(ArtifactsResponse {
        job_id: job.id,
        output_ref: path.display().to_string(),
        artifacts: job.artifacts,
    }))
}

/// GET /api/jobs/{id}/download - Stream the final output file.
async fn download_output(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (job, path) = state.orchestrator.output_file(&id).await?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::warn!(job_id = %job.id, error = %e, "Output vanished before download");
        PipelineError::ArtifactMissing {
            id: job.id.clone(),
            path: path.clone(),
        }
    })?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output")
        .to_string();
    tracing::info!(job_id = %job.id, file = %file_name, "Serving job output");

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&path).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn content_type(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/artifacts", get(job_artifacts))
        .route("/jobs/{id}/download", get(download_output))
}
