// crates/pipeline/src/progress.rs
//! Turns job store changes into per-subscriber event sequences.
//!
//! Every subscriber runs its own poll loop against the [`JobStore`] and keeps
//! its own checkpoint cursor, so a slow or dropped subscriber never affects
//! another one or the job itself.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::Stream;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::store::JobStore;
use crate::types::{Checkpoint, Job, JobId, JobStatus, Stage};

/// One notification delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    Progress {
        percentage: u8,
        stage: Stage,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    StageComplete {
        stage: Stage,
        next_stage: Option<Stage>,
    },
    #[serde(rename_all = "camelCase")]
    Done { output_ref: String },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<JobStatus>,
    },
    Heartbeat,
}

impl ProgressEvent {
    fn new(job_id: &str, correlation_id: &str, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            correlation_id: correlation_id.to_string(),
            timestamp,
            kind,
        }
    }

    /// Wire name of the event kind.
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            EventKind::Progress { .. } => "progress",
            EventKind::StageComplete { .. } => "stage-complete",
            EventKind::Done { .. } => "done",
            EventKind::Error { .. } => "error",
            EventKind::Heartbeat => "heartbeat",
        }
    }

    /// `done` and `error` close the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Done { .. } | EventKind::Error { .. })
    }
}

/// Subscription factory shared by every transport.
#[derive(Clone)]
pub struct ProgressPublisher {
    store: JobStore,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl ProgressPublisher {
    pub fn new(store: JobStore, config: &PipelineConfig) -> Self {
        Self::with_intervals(store, config.poll_interval, config.heartbeat_interval)
    }

    pub fn with_intervals(
        store: JobStore,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            store,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            heartbeat_interval,
        }
    }

    /// Open an event sequence for a job.
    ///
    /// Fails with `NotFound` before any event is produced. A terminal job
    /// yields its terminal event only. A live job yields its latest
    /// checkpoint (if any), then every later checkpoint in order, then exactly
    /// one terminal event.
    pub fn subscribe(
        &self,
        id: &str,
    ) -> PipelineResult<impl Stream<Item = ProgressEvent> + Send + 'static> {
        let initial = self.store.progress_since(id, 0)?;
        let store = self.store.clone();
        let poll_interval = self.poll_interval;
        let heartbeat_interval = self.heartbeat_interval;
        let id = id.to_string();

        Ok(async_stream::stream! {
            let correlation_id = initial.job.correlation_id.clone();
            let mut cursor = initial.cursor;

            if initial.job.is_terminal() {
                yield terminal_event(&initial.job);
                return;
            }
            if let Some(latest) = initial.checkpoints.last() {
                for event in checkpoint_events(&initial.job, latest) {
                    yield event;
                }
            }

            let mut last_emit = Instant::now();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let delta = match store.progress_since(&id, cursor) {
                    Ok(delta) => delta,
                    Err(_) => {
                        tracing::debug!(job_id = %id, "Job disappeared while subscribed");
                        yield ProgressEvent::new(
                            &id,
                            &correlation_id,
                            Utc::now(),
                            EventKind::Error {
                                message: "job is no longer tracked".to_string(),
                                status: None,
                            },
                        );
                        return;
                    }
                };
                cursor = delta.cursor;

                for checkpoint in &delta.checkpoints {
                    for event in checkpoint_events(&delta.job, checkpoint) {
                        yield event;
                    }
                    last_emit = Instant::now();
                }

                if delta.job.is_terminal() {
                    yield terminal_event(&delta.job);
                    return;
                }

                if last_emit.elapsed() >= heartbeat_interval {
                    yield ProgressEvent::new(&id, &correlation_id, Utc::now(), EventKind::Heartbeat);
                    last_emit = Instant::now();
                }
            }
        })
    }
}

/// `progress` followed by `stage-complete` for one applied checkpoint.
fn checkpoint_events(job: &Job, checkpoint: &Checkpoint) -> [ProgressEvent; 2] {
    let message = match checkpoint.stage {
        Stage::Finalize => "Output finalized".to_string(),
        stage => format!("{} stage complete", stage.label()),
    };
    [
        ProgressEvent::new(
            &job.id,
            &job.correlation_id,
            checkpoint.at,
            EventKind::Progress {
                percentage: checkpoint.percent,
                stage: checkpoint.stage,
                message,
            },
        ),
        ProgressEvent::new(
            &job.id,
            &job.correlation_id,
            checkpoint.at,
            EventKind::StageComplete {
                stage: checkpoint.stage,
                next_stage: checkpoint.stage.next(),
            },
        ),
    ]
}

fn terminal_event(job: &Job) -> ProgressEvent {
    let timestamp = job.completed_at.unwrap_or_else(Utc::now);
    let kind = match job.status {
        JobStatus::Done => EventKind::Done {
            output_ref: job
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        },
        JobStatus::Canceled => EventKind::Error {
            message: "job canceled".to_string(),
            status: Some(JobStatus::Canceled),
        },
        _ => EventKind::Error {
            message: job
                .error_message
                .clone()
                .unwrap_or_else(|| "job failed".to_string()),
            status: Some(JobStatus::Failed),
        },
    };
    ProgressEvent::new(&job.id, &job.correlation_id, timestamp, kind)
}
