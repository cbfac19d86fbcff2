// crates/pipeline/src/error.rs
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Errors surfaced by the job store, orchestrator and progress publisher.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid generation request: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job limit reached: {limit} jobs already admitted")]
    ResourceExhausted { limit: usize },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Progress for job {id} cannot go backwards ({current}% -> {requested}%)")]
    ProgressRegression {
        id: JobId,
        current: u8,
        requested: u8,
    },

    #[error("Job {id} is {status}; output is only available once it is done")]
    NotReady { id: JobId, status: JobStatus },

    #[error("Output for job {id} is missing on disk: {path}")]
    ArtifactMissing { id: JobId, path: PathBuf },
}

impl PipelineError {
    pub fn not_found(id: impl Into<JobId>) -> Self {
        Self::NotFound(id.into())
    }
}

/// Result alias used across the pipeline crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors a stage executor may return.
///
/// The orchestrator treats the payload as opaque and keeps only the message.
#[derive(Debug, Error)]
pub enum StageError {
    /// The executor observed the cancellation signal and stopped early.
    #[error("stage canceled")]
    Canceled,

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
