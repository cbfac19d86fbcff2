// crates/pipeline/src/lib.rs
//! Multi-stage generation job pipeline.
//!
//! Provides:
//! - `JobStore` - concurrent job registry with per-job checkpoint log
//! - `JobOrchestrator` - admits jobs and drives script → audio → visual → compose
//! - `StageExecutor` - pluggable per-stage work contract
//! - `CancellationCoordinator` - per-job cooperative cancellation tokens
//! - `ProgressPublisher` - independent per-subscriber progress event streams

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod placeholder;
pub mod progress;
pub mod request;
pub mod store;
pub mod types;

pub use cancel::CancellationCoordinator;
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult, StageError};
pub use executor::{StageExecutor, StageInput, StageOutput, StageRegistry};
pub use orchestrator::JobOrchestrator;
pub use placeholder::PlaceholderExecutor;
pub use progress::{EventKind, ProgressEvent, ProgressPublisher};
pub use request::{Brief, GenerationRequest, OutputFormat, PlanSpec, RenderSpec, VoiceSpec};
pub use store::{JobStore, ProgressDelta};
pub use types::{Artifact, ArtifactKind, Checkpoint, Job, JobId, JobStatus, Stage};
