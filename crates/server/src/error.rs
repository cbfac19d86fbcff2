// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reelforge_pipeline::PipelineError;
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Pipeline(err) => pipeline_response(err),
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "Conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Conflict", msg.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

fn pipeline_response(err: &PipelineError) -> (StatusCode, ErrorResponse) {
    match err {
        PipelineError::Validation(msg) => {
            tracing::warn!(message = %msg, "Invalid generation request");
            (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_details("Invalid request", msg.clone()),
            )
        }
        PipelineError::NotFound(id) => {
            tracing::warn!(job_id = %id, "Job not found");
            (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
            )
        }
        PipelineError::ResourceExhausted { limit } => {
            tracing::warn!(limit, "Job limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse::with_details("Too many jobs", err.to_string()),
            )
        }
        PipelineError::NotReady { id, status } => {
            tracing::warn!(job_id = %id, status = %status, "Output requested before completion");
            (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_details("Job not complete", err.to_string()),
            )
        }
        PipelineError::ArtifactMissing { id, path } => {
            tracing::error!(job_id = %id, path = %path.display(), "Output file missing");
            (
                StatusCode::GONE,
                ErrorResponse::with_details("Output no longer available", err.to_string()),
            )
        }
        PipelineError::InvalidTransition { .. } | PipelineError::ProgressRegression { .. } => {
            tracing::error!(error = %err, "Job state conflict");
            (
                StatusCode::CONFLICT,
                ErrorResponse::with_details("Conflict", err.to_string()),
            )
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
