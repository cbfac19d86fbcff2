//! Shared fixtures for pipeline integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelforge_pipeline::{
    Artifact, ArtifactKind, Brief, GenerationRequest, Job, JobOrchestrator, JobStore,
    OutputFormat, PipelineConfig, PlanSpec, RenderSpec, StageError, StageExecutor, StageInput,
    StageOutput, StageRegistry, VoiceSpec,
};
use tokio_util::sync::CancellationToken;

pub fn request() -> GenerationRequest {
    GenerationRequest::new(
        Brief {
            topic: "Why the sky is blue".to_string(),
            audience: Some("students".to_string()),
            goal: None,
            tone: Some("curious".to_string()),
            keywords: vec!["rayleigh".to_string()],
        },
        PlanSpec {
            target_duration_secs: 60,
            scene_count: Some(4),
            style: "explainer".to_string(),
        },
        VoiceSpec {
            voice: "nova".to_string(),
            rate: 1.0,
            pitch: 0.0,
        },
        RenderSpec {
            width: 1280,
            height: 720,
            fps: 30,
            format: OutputFormat::Mp4,
        },
    )
}

#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    Panic,
    /// Ignores the token and returns a generic error once it fires.
    ErrorOnCancel,
}

/// Test executor with a fixed delay, counting how often it ran.
pub struct StubExecutor {
    delay: Duration,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubExecutor {
    pub fn new(delay: Duration, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            delay,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(delay_ms: u64) -> Arc<Self> {
        Self::new(Duration::from_millis(delay_ms), Behavior::Succeed)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageExecutor for StubExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        input: StageInput,
    ) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Panic => panic!("{} executor crashed", input.stage),
            Behavior::ErrorOnCancel => {
                cancel.cancelled().await;
                return Err(StageError::failed("connection reset"));
            }
            _ => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(StageError::Canceled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        if let Behavior::Fail(message) = self.behavior {
            return Err(StageError::failed(message));
        }

        let path = input.work_dir.join(format!("{}.bin", input.stage));
        Ok(StageOutput {
            artifacts: vec![Artifact {
                name: format!("{}.bin", input.stage),
                path: path.clone(),
                kind: ArtifactKind::Other,
                size_bytes: 0,
            }],
            primary: Some(path),
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

pub fn orchestrator(registry: StageRegistry) -> JobOrchestrator {
    orchestrator_with(registry, PipelineConfig::default())
}

pub fn orchestrator_with(registry: StageRegistry, config: PipelineConfig) -> JobOrchestrator {
    JobOrchestrator::new(JobStore::new(), registry, config)
}

/// Poll until the job is terminal or five seconds pass.
pub async fn wait_terminal(orchestrator: &JobOrchestrator, id: &str) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = orchestrator.get(id).expect("job exists");
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} still {} after 5s",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
