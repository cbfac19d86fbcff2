// crates/pipeline/src/orchestrator.rs
//! Creates jobs and drives each one through the fixed stage sequence.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use metrics::{counter, gauge, histogram};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cancel::CancellationCoordinator;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, StageError};
use crate::executor::{StageInput, StageOutput, StageRegistry};
use crate::request::{Brief, GenerationRequest, PlanSpec, RenderSpec, VoiceSpec};
use crate::store::JobStore;
use crate::types::{Job, JobId, JobStatus, Stage};

/// Central orchestrator that owns job execution.
///
/// Cheap to clone. Each admitted job gets its own tokio task which is the
/// only writer of that job's status, percent and stage.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: JobStore,
    cancellation: CancellationCoordinator,
    executors: StageRegistry,
    config: PipelineConfig,
    slots: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// How a job's execution unit ended.
enum Outcome {
    Completed { output: PathBuf },
    Failed(String),
    Canceled,
    /// Someone else already finished the record.
    AlreadyTerminal,
    /// The record vanished or was changed under us.
    Abandoned(PipelineError),
}

/// Holds one admission slot; released when the job's task ends.
struct Admission {
    admitted: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let remaining = self.admitted.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!("reelforge_jobs_active").set(remaining as f64);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

impl JobOrchestrator {
    pub fn new(store: JobStore, executors: StageRegistry, config: PipelineConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.execution_slots()));
        Self {
            inner: Arc::new(Inner {
                store,
                cancellation: CancellationCoordinator::new(),
                executors,
                config,
                slots,
                admitted: Arc::new(AtomicUsize::new(0)),
                idle: Arc::new(Notify::new()),
            }),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn cancellation(&self) -> &CancellationCoordinator {
        &self.inner.cancellation
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Validate the composed request, create a `Queued` job and spawn its
    /// execution unit.
    pub fn create_and_start(
        &self,
        brief: Brief,
        plan: PlanSpec,
        voice: VoiceSpec,
        render: RenderSpec,
        correlation_id: impl Into<String>,
    ) -> PipelineResult<Job> {
        self.submit(GenerationRequest::new(brief, plan, voice, render), correlation_id)
    }

    /// Same as [`create_and_start`](Self::create_and_start) for an already
    /// composed request. Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        request: GenerationRequest,
        correlation_id: impl Into<String>,
    ) -> PipelineResult<Job> {
        let correlation_id = correlation_id.into();
        if let Err(e) = request.ensure_valid() {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "Rejected invalid request");
            return Err(e);
        }
        let admission = self.admit(&correlation_id)?;

        let job = self.inner.store.create(correlation_id);
        let cancel = self.inner.cancellation.register(&job.id);
        counter!("reelforge_jobs_created_total").increment(1);

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            correlation_id = %job.correlation_id,
        );
        tracing::info!(
            job_id = %job.id,
            correlation_id = %job.correlation_id,
            topic = %request.brief.topic,
            "Job created"
        );

        let inner = Arc::clone(&self.inner);
        let id = job.id.clone();
        let request = Arc::new(request);
        tokio::spawn(
            async move { inner.run(id, request, cancel, admission).await }.instrument(span),
        );
        Ok(job)
    }

    pub fn get(&self, id: &str) -> PipelineResult<Job> {
        self.inner.store.get(id)
    }

    /// Resolve the output file of a `Done` job, checking it still exists.
    pub async fn output_file(&self, id: &str) -> PipelineResult<(Job, PathBuf)> {
        let job = self.inner.store.get(id)?;
        if job.status != JobStatus::Done {
            return Err(PipelineError::NotReady {
                id: job.id,
                status: job.status,
            });
        }
        let path = job.output_path.clone().unwrap_or_default();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((job, path)),
            _ => Err(PipelineError::ArtifactMissing { id: job.id, path }),
        }
    }

    /// Ask a `Queued` or `Running` job to stop.
    ///
    /// Returns immediately; the job's own task performs the transition to
    /// `Canceled` once it observes the signal. `Ok(false)` means nothing new
    /// was signaled: the job is terminal, cancellation was already requested,
    /// or the job has passed its last stage and is committing its output.
    /// `Ok(true)` guarantees the job ends `Canceled`.
    pub fn cancel_job(&self, id: &str) -> PipelineResult<bool> {
        let job = self.inner.store.get(id)?;
        if job.is_terminal() {
            tracing::debug!(job_id = %id, status = %job.status, "Cancel ignored for finished job");
            return Ok(false);
        }
        let delivered = self.inner.cancellation.request_cancel(id);
        if delivered {
            tracing::info!(
                job_id = %id,
                correlation_id = %job.correlation_id,
                status = %job.status,
                "Cancellation requested"
            );
        }
        Ok(delivered)
    }

    /// Jobs currently `Queued` or `Running`.
    pub fn active_jobs(&self) -> usize {
        self.inner.admitted.load(Ordering::Acquire)
    }

    /// Signal every live job to stop. Returns how many were signaled.
    pub fn shutdown(&self) -> usize {
        let signaled = self.inner.cancellation.cancel_all();
        if signaled > 0 {
            tracing::info!(signaled, "Cancelling in-flight jobs for shutdown");
        }
        signaled
    }

    /// Wait until no job is admitted, or `timeout` elapses. Returns `true`
    /// if the orchestrator went idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let mut notified = std::pin::pin!(self.inner.idle.notified());
                // Register before checking so a release in between is not missed.
                notified.as_mut().enable();
                if self.active_jobs() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    fn admit(&self, correlation_id: &str) -> PipelineResult<Admission> {
        let limit = self.inner.config.admission_limit();
        let admitted = &self.inner.admitted;
        match admitted.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < limit).then_some(n + 1)
        }) {
            Ok(previous) => {
                gauge!("reelforge_jobs_active").set((previous + 1) as f64);
                Ok(Admission {
                    admitted: Arc::clone(admitted),
                    idle: Arc::clone(&self.inner.idle),
                })
            }
            Err(_) => {
                counter!("reelforge_jobs_rejected_total").increment(1);
                tracing::warn!(correlation_id = %correlation_id, limit, "Job limit reached");
                Err(PipelineError::ResourceExhausted { limit })
            }
        }
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        id: JobId,
        request: Arc<GenerationRequest>,
        cancel: CancellationToken,
        _admission: Admission,
    ) {
        let started = Instant::now();
        let outcome = self.drive(&id, &request, &cancel).await;
        self.settle(&id, outcome, started);
        self.cancellation.release(&id);
    }

    async fn drive(
        &self,
        id: &str,
        request: &Arc<GenerationRequest>,
        cancel: &CancellationToken,
    ) -> Outcome {
        // A queued job holds no slot yet; cancellation still wins the race.
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Canceled,
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("Execution slots closed before the job started");
                    return Outcome::Canceled;
                }
            },
        };

        let job = match self.store.mark_running(id).and_then(|_| self.store.get(id)) {
            Ok(job) if job.status == JobStatus::Running => job,
            Ok(_) => return Outcome::AlreadyTerminal,
            Err(e) => return Outcome::Abandoned(e),
        };
        tracing::info!("Job running");

        let work_dir = self.config.output_root.join(id);
        let mut previous: Vec<(Stage, StageOutput)> = Vec::with_capacity(Stage::EXECUTED.len());

        for stage in Stage::EXECUTED {
            if cancel.is_cancelled() {
                tracing::info!(stage = %stage, "Cancellation observed at stage entry");
                return Outcome::Canceled;
            }
            let Some(executor) = self.executors.executor(stage) else {
                return Outcome::Failed(format!("No executor registered for the {stage} stage"));
            };

            let input = StageInput {
                job_id: id.to_string(),
                correlation_id: job.correlation_id.clone(),
                stage,
                request: Arc::clone(request),
                work_dir: work_dir.clone(),
                previous: previous.clone(),
            };

            tracing::debug!(stage = %stage, executor = executor.name(), "Stage started");
            let stage_started = Instant::now();
            let result = AssertUnwindSafe(executor.execute(cancel, input))
                .catch_unwind()
                .await;
            histogram!("reelforge_stage_duration_seconds", "stage" => stage.as_str())
                .record(stage_started.elapsed().as_secs_f64());

            let output = match result {
                Ok(Ok(output)) => output,
                Ok(Err(StageError::Canceled)) => {
                    tracing::info!(stage = %stage, "Stage stopped on cancellation");
                    return Outcome::Canceled;
                }
                Ok(Err(e)) if cancel.is_cancelled() => {
                    tracing::info!(stage = %stage, error = %e, "Stage errored after cancellation");
                    return Outcome::Canceled;
                }
                Ok(Err(e)) => {
                    return Outcome::Failed(format!("{} stage failed: {e}", stage.label()));
                }
                Err(panic) => {
                    return Outcome::Failed(format!(
                        "{} stage panicked: {}",
                        stage.label(),
                        panic_message(&*panic)
                    ));
                }
            };

            if let Err(e) = self
                .store
                .append_artifacts(id, output.artifacts.clone())
                .and_then(|_| self.store.update_progress(id, stage.checkpoint(), stage))
            {
                return Outcome::Abandoned(e);
            }
            tracing::info!(
                stage = %stage,
                percent = stage.checkpoint(),
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Stage complete"
            );
            previous.push((stage, output));
        }

        // Past this point a cancel request is refused rather than ignored.
        if self.cancellation.seal(id) || cancel.is_cancelled() {
            return Outcome::Canceled;
        }

        let Some(output) = previous
            .iter()
            .find(|(stage, _)| *stage == Stage::Compose)
            .and_then(|(_, out)| out.primary.clone())
        else {
            return Outcome::Failed("Compose stage produced no output".to_string());
        };

        if let Err(e) = self
            .store
            .update_progress(id, Stage::Finalize.checkpoint(), Stage::Finalize)
        {
            return Outcome::Abandoned(e);
        }
        Outcome::Completed { output }
    }

    fn settle(&self, id: &str, outcome: Outcome, started: Instant) {
        let recorded = match outcome {
            Outcome::Completed { output } => self
                .store
                .complete(id, output, Vec::new())
                .map(|_| JobStatus::Done),
            Outcome::Failed(message) => {
                tracing::error!(error = %message, "Job failed");
                self.store.fail(id, message).map(|_| JobStatus::Failed)
            }
            Outcome::Canceled => self.store.cancel(id).map(|_| JobStatus::Canceled),
            Outcome::AlreadyTerminal => {
                tracing::debug!("Job was already finished before it started");
                return;
            }
            Outcome::Abandoned(e) => {
                tracing::warn!(error = %e, "Job record changed underneath its task; abandoning");
                return;
            }
        };

        match recorded {
            Ok(status) => {
                counter!("reelforge_jobs_finished_total", "status" => status.as_str()).increment(1);
                histogram!("reelforge_job_duration_seconds", "status" => status.as_str())
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(
                    status = %status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Could not record final job state"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
