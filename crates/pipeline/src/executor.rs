// crates/pipeline/src/executor.rs
//! Stage executor contract and the stage → executor mapping.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StageError;
use crate::request::GenerationRequest;
use crate::types::{Artifact, JobId, Stage};

/// Everything a stage receives for one invocation.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: JobId,
    pub correlation_id: String,
    pub stage: Stage,
    pub request: Arc<GenerationRequest>,
    /// Per-job directory stages write into.
    pub work_dir: PathBuf,
    /// Outputs of the stages that already ran, in run order.
    pub previous: Vec<(Stage, StageOutput)>,
}

impl StageInput {
    pub fn output_of(&self, stage: Stage) -> Option<&StageOutput> {
        self.previous
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, output)| output)
    }
}

/// What a stage hands back on success.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Files to append to the job's artifact list.
    pub artifacts: Vec<Artifact>,
    /// Main product of the stage; the compose stage's becomes the job output.
    pub primary: Option<PathBuf>,
}

/// One pipeline step's work.
///
/// Implementations must either return promptly or watch `cancel` and return
/// [`StageError::Canceled`] once it fires. The orchestrator never aborts a
/// running stage; it only checks the token between stages.
///
/// Implementations include:
/// - `PlaceholderExecutor` - writes stand-in files after a fixed delay
/// - real script/TTS/image/compositing backends supplied by the embedding app
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        input: StageInput,
    ) -> Result<StageOutput, StageError>;

    /// Executor name for logging (e.g. "placeholder", "elevenlabs").
    fn name(&self) -> &str;
}

/// Executor assignment for every executor-backed stage.
#[derive(Clone)]
pub struct StageRegistry {
    script: Arc<dyn StageExecutor>,
    audio: Arc<dyn StageExecutor>,
    visual: Arc<dyn StageExecutor>,
    compose: Arc<dyn StageExecutor>,
}

impl StageRegistry {
    pub fn new(
        script: Arc<dyn StageExecutor>,
        audio: Arc<dyn StageExecutor>,
        visual: Arc<dyn StageExecutor>,
        compose: Arc<dyn StageExecutor>,
    ) -> Self {
        Self {
            script,
            audio,
            visual,
            compose,
        }
    }

    /// Use the same executor for every stage.
    pub fn uniform(executor: Arc<dyn StageExecutor>) -> Self {
        Self::new(
            Arc::clone(&executor),
            Arc::clone(&executor),
            Arc::clone(&executor),
            executor,
        )
    }

    /// Replace the executor for one stage. `Finalize` has no executor and is
    /// left untouched.
    pub fn with(mut self, stage: Stage, executor: Arc<dyn StageExecutor>) -> Self {
        match stage {
            Stage::Script => self.script = executor,
            Stage::Audio => self.audio = executor,
            Stage::Visual => self.visual = executor,
            Stage::Compose => self.compose = executor,
            Stage::Finalize => {
                tracing::warn!("Ignoring executor registration for the finalize stage");
            }
        }
        self
    }

    pub fn executor(&self, stage: Stage) -> Option<&Arc<dyn StageExecutor>> {
        match stage {
            Stage::Script => Some(&self.script),
            Stage::Audio => Some(&self.audio),
            Stage::Visual => Some(&self.visual),
            Stage::Compose => Some(&self.compose),
            Stage::Finalize => None,
        }
    }
}
