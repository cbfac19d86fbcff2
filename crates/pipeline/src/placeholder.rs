// crates/pipeline/src/placeholder.rs
//! Stand-in executors that let the service run end to end without real
//! generation backends.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StageError;
use crate::executor::{StageExecutor, StageInput, StageOutput, StageRegistry};
use crate::request::GenerationRequest;
use crate::types::{Artifact, ArtifactKind, Stage};

/// Waits `delay` (cancellable), then writes a small descriptive file for its
/// stage into the job's work directory.
pub struct PlaceholderExecutor {
    stage: Stage,
    delay: Duration,
}

impl PlaceholderExecutor {
    pub fn new(stage: Stage, delay: Duration) -> Self {
        Self { stage, delay }
    }

    /// A registry with one placeholder per executed stage.
    pub fn registry(delay: Duration) -> StageRegistry {
        let make = |stage| Arc::new(Self::new(stage, delay)) as Arc<dyn StageExecutor>;
        StageRegistry::new(
            make(Stage::Script),
            make(Stage::Audio),
            make(Stage::Visual),
            make(Stage::Compose),
        )
    }
}

#[async_trait]
impl StageExecutor for PlaceholderExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        input: StageInput,
    ) -> Result<StageOutput, StageError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(StageError::Canceled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let request = &input.request;
        let (file_name, kind, contents) = match self.stage {
            Stage::Script => ("script.md".to_string(), ArtifactKind::Script, script_text(request)),
            Stage::Audio => (
                "narration.txt".to_string(),
                ArtifactKind::Audio,
                format!(
                    "voice={} rate={:.2} pitch={:+.1}\n",
                    request.voice.voice, request.voice.rate, request.voice.pitch
                ),
            ),
            Stage::Visual => (
                "storyboard.txt".to_string(),
                ArtifactKind::Image,
                storyboard_text(request),
            ),
            Stage::Compose => (
                format!("final.{}", request.render.format.extension()),
                ArtifactKind::Video,
                format!(
                    "{}x{}@{}fps {}\n",
                    request.render.width,
                    request.render.height,
                    request.render.fps,
                    request.brief.topic
                ),
            ),
            Stage::Finalize => {
                return Err(StageError::failed("finalize is not an executor stage"));
            }
        };

        tokio::fs::create_dir_all(&input.work_dir).await?;
        let path = input.work_dir.join(&file_name);
        tokio::fs::write(&path, contents).await?;
        let artifact = describe(&path, file_name, kind).await?;

        tracing::debug!(
            job_id = %input.job_id,
            stage = %self.stage,
            path = %path.display(),
            "Placeholder stage wrote output"
        );

        Ok(StageOutput {
            artifacts: vec![artifact],
            primary: Some(path),
        })
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

async fn describe(path: &Path, name: String, kind: ArtifactKind) -> Result<Artifact, StageError> {
    let size_bytes = tokio::fs::metadata(path).await?.len();
    Ok(Artifact {
        name,
        path: path.to_path_buf(),
        kind,
        size_bytes,
    })
}

fn script_text(request: &GenerationRequest) -> String {
    let scenes = request.plan.scene_count.unwrap_or(1).max(1);
    let mut text = format!("# {}\n\n", request.brief.topic.trim());
    for scene in 1..=scenes {
        text.push_str(&format!(
            "## Scene {scene}\n{} narration, {} style.\n\n",
            request.brief.tone.as_deref().unwrap_or("neutral"),
            request.plan.style
        ));
    }
    text
}

fn storyboard_text(request: &GenerationRequest) -> String {
    let scenes = request.plan.scene_count.unwrap_or(1).max(1);
    let per_scene = request.plan.target_duration_secs as f32 / scenes as f32;
    (1..=scenes)
        .map(|scene| format!("scene {scene}: {per_scene:.1}s\n"))
        .collect()
}
