// crates/pipeline/src/types.rs
//! Types for the generation job pipeline.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a generation job (string form of a v4 UUID).
pub type JobId = String;

/// Mint a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle status of a job.
///
/// `Queued → Running → {Done, Failed, Canceled}`. The three terminal states
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the fixed pipeline.
///
/// `Script`..`Compose` are run by stage executors; `Finalize` is performed by
/// the orchestrator once every executor has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Script,
    Audio,
    Visual,
    Compose,
    Finalize,
}

impl Stage {
    /// Executor-backed stages, in run order.
    pub const EXECUTED: [Stage; 4] = [Stage::Script, Stage::Audio, Stage::Visual, Stage::Compose];

    /// Percentage recorded once this stage has completed.
    pub fn checkpoint(self) -> u8 {
        match self {
            Self::Script => 15,
            Self::Audio => 35,
            Self::Visual => 65,
            Self::Compose => 85,
            Self::Finalize => 100,
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Script => Some(Self::Audio),
            Self::Audio => Some(Self::Visual),
            Self::Visual => Some(Self::Compose),
            Self::Compose => Some(Self::Finalize),
            Self::Finalize => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Audio => "audio",
            Self::Visual => "visual",
            Self::Compose => "compose",
            Self::Finalize => "finalize",
        }
    }

    /// Human-facing name used in progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Script => "Script",
            Self::Audio => "Audio",
            Self::Visual => "Visual",
            Self::Compose => "Compose",
            Self::Finalize => "Finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of file a stage produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Script,
    Audio,
    Image,
    Video,
    Other,
}

/// A file produced by a stage. Artifacts are only ever appended to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

/// A percent/stage pair applied by the orchestrator, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub percent: u8,
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// Snapshot of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub percent: u8,
    /// Last completed stage; moves only together with `percent`.
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub output_path: Option<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub correlation_id: String,
}

impl Job {
    pub(crate) fn queued(id: JobId, correlation_id: String) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            percent: 0,
            stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            output_path: None,
            artifacts: Vec::new(),
            correlation_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
