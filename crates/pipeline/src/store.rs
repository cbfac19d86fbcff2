// crates/pipeline/src/store.rs
//! In-memory registry of job records.
//!
//! Records live in a sharded `DashMap`, so a mutation locks only the shard
//! holding that job and unrelated jobs never contend on one global lock.
//! Every mutation runs entirely under the entry guard; readers always get a
//! cloned snapshot and can never observe a half-applied update.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{new_job_id, Artifact, Checkpoint, Job, JobId, JobStatus, Stage};

struct JobRecord {
    job: Job,
    /// Every percent/stage change, oldest first.
    checkpoints: Vec<Checkpoint>,
}

/// A job snapshot together with the checkpoints a reader has not seen yet.
#[derive(Debug, Clone)]
pub struct ProgressDelta {
    pub job: Job,
    pub checkpoints: Vec<Checkpoint>,
    /// Cursor to pass on the next call.
    pub cursor: usize,
}

/// Concurrency-safe job registry. Cloning shares the same underlying map.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<JobId, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `Queued` state.
    pub fn create(&self, correlation_id: impl Into<String>) -> Job {
        let id = new_job_id();
        let job = Job::queued(id.clone(), correlation_id.into());
        self.jobs.insert(
            id,
            JobRecord {
                job: job.clone(),
                checkpoints: Vec::new(),
            },
        );
        job
    }

    pub fn get(&self, id: &str) -> PipelineResult<Job> {
        self.jobs
            .get(id)
            .map(|record| record.job.clone())
            .ok_or_else(|| PipelineError::not_found(id))
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|r| r.job.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// `Queued → Running`.
    ///
    /// Returns `Ok(false)` if the job already reached a terminal state (for
    /// example it was canceled while waiting for an execution slot).
    pub fn mark_running(&self, id: &str) -> PipelineResult<bool> {
        self.with_record(id, |record| match record.job.status {
            JobStatus::Queued => {
                record.job.status = JobStatus::Running;
                record.job.started_at = Some(Utc::now());
                Ok(true)
            }
            status if status.is_terminal() => Ok(false),
            from => Err(transition(id, from, JobStatus::Running)),
        })
    }

    /// Apply a percent/stage checkpoint to a running job.
    ///
    /// Both fields change together and are logged as one checkpoint. Percent
    /// never decreases; re-applying the current checkpoint is a no-op.
    pub fn update_progress(&self, id: &str, percent: u8, stage: Stage) -> PipelineResult<()> {
        let percent = percent.min(100);
        self.with_record(id, |record| {
            let job = &mut record.job;
            if job.status != JobStatus::Running {
                return Err(transition(id, job.status, JobStatus::Running));
            }
            if percent < job.percent {
                return Err(PipelineError::ProgressRegression {
                    id: id.to_string(),
                    current: job.percent,
                    requested: percent,
                });
            }
            if percent == job.percent && job.stage == Some(stage) {
                return Ok(());
            }
            job.percent = percent;
            job.stage = Some(stage);
            record.checkpoints.push(Checkpoint {
                percent,
                stage,
                at: Utc::now(),
            });
            Ok(())
        })
    }

    /// Append stage artifacts to a job that has not finished yet.
    pub fn append_artifacts(&self, id: &str, artifacts: Vec<Artifact>) -> PipelineResult<()> {
        self.with_record(id, |record| {
            if record.job.is_terminal() {
                return Err(transition(id, record.job.status, record.job.status));
            }
            record.job.artifacts.extend(artifacts);
            Ok(())
        })
    }

    /// `Running → Done`.
    pub fn complete(
        &self,
        id: &str,
        output_path: PathBuf,
        artifacts: Vec<Artifact>,
    ) -> PipelineResult<()> {
        self.with_record(id, |record| {
            let job = &mut record.job;
            if job.status != JobStatus::Running {
                return Err(transition(id, job.status, JobStatus::Done));
            }
            job.artifacts.extend(artifacts);
            job.output_path = Some(output_path);
            job.status = JobStatus::Done;
            job.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    /// `Running → Failed`. A job that never started cannot fail.
    pub fn fail(&self, id: &str, error_message: impl Into<String>) -> PipelineResult<()> {
        self.with_record(id, |record| {
            let job = &mut record.job;
            if job.status != JobStatus::Running {
                return Err(transition(id, job.status, JobStatus::Failed));
            }
            job.status = JobStatus::Failed;
            job.error_message = Some(error_message.into());
            job.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    /// `Queued | Running → Canceled`.
    ///
    /// Returns `Ok(false)` without touching the record if the job is already
    /// terminal.
    pub fn cancel(&self, id: &str) -> PipelineResult<bool> {
        self.with_record(id, |record| {
            let job = &mut record.job;
            if job.is_terminal() {
                return Ok(false);
            }
            job.status = JobStatus::Canceled;
            job.completed_at = Some(Utc::now());
            Ok(true)
        })
    }

    /// Snapshot of a job plus the checkpoints at index `cursor` and later,
    /// read under a single guard.
    pub fn progress_since(&self, id: &str, cursor: usize) -> PipelineResult<ProgressDelta> {
        let record = self
            .jobs
            .get(id)
            .ok_or_else(|| PipelineError::not_found(id))?;
        let start = cursor.min(record.checkpoints.len());
        Ok(ProgressDelta {
            job: record.job.clone(),
            checkpoints: record.checkpoints[start..].to_vec(),
            cursor: record.checkpoints.len(),
        })
    }

    /// Number of checkpoints recorded so far for a job.
    pub fn checkpoint_count(&self, id: &str) -> PipelineResult<usize> {
        self.jobs
            .get(id)
            .map(|record| record.checkpoints.len())
            .ok_or_else(|| PipelineError::not_found(id))
    }

    /// Drop terminal jobs that completed more than `age` ago.
    ///
    /// Retention is decided by the caller; the pipeline never evicts on its own.
    pub fn evict_terminal_older_than(&self, age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut evicted = 0;
        self.jobs.retain(|_, record| {
            let expired = record.job.is_terminal()
                && record.job.completed_at.is_some_and(|at| at < cutoff);
            if expired {
                evicted += 1;
            }
            !expired
        });
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired jobs");
        }
        evicted
    }

    fn with_record<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut JobRecord) -> PipelineResult<T>,
    ) -> PipelineResult<T> {
        let mut record = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| PipelineError::not_found(id))?;
        f(record.value_mut())
    }
}

fn transition(id: &str, from: JobStatus, to: JobStatus) -> PipelineError {
    PipelineError::InvalidTransition {
        id: id.to_string(),
        from,
        to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArtifactKind;

    fn running_job(store: &JobStore) -> Job {
        let job = store.create("corr-1");
        assert!(store.mark_running(&job.id).unwrap());
        job
    }

    fn artifact(name: &str) -> Artifact {
        Artifact {
            name: name.to_string(),
            path: PathBuf::from(format!("/tmp/{name}")),
            kind: ArtifactKind::Other,
            size_bytes: 1,
        }
    }

    #[test]
    fn test_job_lifecycle() {
        let store = JobStore::new();

        // Initial state
        let job = store.create("corr-1");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.percent, 0);
        assert_eq!(job.correlation_id, "corr-1");
        assert!(job.completed_at.is_none());

        // Running
        assert!(store.mark_running(&job.id).unwrap());
        let snap = store.get(&job.id).unwrap();
        assert_eq!(snap.status, JobStatus::Running);
        assert!(snap.started_at.is_some());

        // Progress
        store.update_progress(&job.id, 15, Stage::Script).unwrap();
        store.update_progress(&job.id, 35, Stage::Audio).unwrap();
        let snap = store.get(&job.id).unwrap();
        assert_eq!(snap.percent, 35);
        assert_eq!(snap.stage, Some(Stage::Audio));

        // Complete
        store
            .complete(&job.id, PathBuf::from("/tmp/final.mp4"), vec![artifact("final.mp4")])
            .unwrap();
        let snap = store.get(&job.id).unwrap();
        assert_eq!(snap.status, JobStatus::Done);
        assert_eq!(snap.output_path, Some(PathBuf::from("/tmp/final.mp4")));
        assert_eq!(snap.artifacts.len(), 1);
        assert!(snap.completed_at.is_some());
        assert!(snap.error_message.is_none());
    }

    #[test]
    fn test_get_unknown_job() {
        let store = JobStore::new();
        assert!(matches!(store.get("nope"), Err(PipelineError::NotFound(id)) if id == "nope"));
        assert!(matches!(store.cancel("nope"), Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn test_progress_requires_running() {
        let store = JobStore::new();
        let job = store.create("c");
        let err = store.update_progress(&job.id, 15, Stage::Script).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition { from: JobStatus::Queued, .. }
        ));
    }

    #[test]
    fn test_progress_never_regresses() {
        let store = JobStore::new();
        let job = running_job(&store);
        store.update_progress(&job.id, 65, Stage::Visual).unwrap();
        let err = store.update_progress(&job.id, 35, Stage::Audio).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ProgressRegression { current: 65, requested: 35, .. }
        ));
        assert_eq!(store.get(&job.id).unwrap().percent, 65);
    }

    #[test]
    fn test_repeated_checkpoint_is_not_logged_twice() {
        let store = JobStore::new();
        let job = running_job(&store);
        store.update_progress(&job.id, 15, Stage::Script).unwrap();
        store.update_progress(&job.id, 15, Stage::Script).unwrap();
        assert_eq!(store.checkpoint_count(&job.id).unwrap(), 1);
    }

    #[test]
    fn test_failure_keeps_percent() {
        let store = JobStore::new();
        let job = running_job(&store);
        store.update_progress(&job.id, 15, Stage::Script).unwrap();
        store.fail(&job.id, "Connection timeout").unwrap();

        let snap = store.get(&job.id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.percent, 15);
        assert_eq!(snap.error_message.as_deref(), Some("Connection timeout"));
        assert!(snap.output_path.is_none());
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let store = JobStore::new();
        let job = running_job(&store);
        assert!(store.cancel(&job.id).unwrap());
        let before = store.get(&job.id).unwrap();

        assert!(!store.cancel(&job.id).unwrap());
        assert!(store.fail(&job.id, "late").is_err());
        assert!(store.complete(&job.id, PathBuf::from("/x"), vec![]).is_err());
        assert!(store.update_progress(&job.id, 85, Stage::Compose).is_err());
        assert!(store.append_artifacts(&job.id, vec![artifact("late")]).is_err());
        assert!(!store.mark_running(&job.id).unwrap());

        let after = store.get(&job.id).unwrap();
        assert_eq!(after.status, JobStatus::Canceled);
        assert_eq!(after.completed_at, before.completed_at);
        assert!(after.artifacts.is_empty());
    }

    #[test]
    fn test_queued_job_cannot_fail() {
        let store = JobStore::new();
        let job = store.create("c");
        let err = store.fail(&job.id, "too early").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Failed,
                ..
            }
        ));
        let snap = store.get(&job.id).unwrap();
        assert_eq!(snap.status, JobStatus::Queued);
        assert!(snap.error_message.is_none());
        assert!(snap.completed_at.is_none());
    }

    #[test]
    fn test_cancel_queued_job() {
        let store = JobStore::new();
        let job = store.create("c");
        assert!(store.cancel(&job.id).unwrap());
        let snap = store.get(&job.id).unwrap();
        assert_eq!(snap.status, JobStatus::Canceled);
        assert_eq!(snap.percent, 0);
    }

    #[test]
    fn test_progress_since_returns_unseen_checkpoints() {
        let store = JobStore::new();
        let job = running_job(&store);
        store.update_progress(&job.id, 15, Stage::Script).unwrap();
        store.update_progress(&job.id, 35, Stage::Audio).unwrap();

        let first = store.progress_since(&job.id, 0).unwrap();
        let seen: Vec<u8> = first.checkpoints.iter().map(|c| c.percent).collect();
        assert_eq!(seen, vec![15, 35]);
        assert_eq!(first.cursor, 2);

        store.update_progress(&job.id, 65, Stage::Visual).unwrap();
        let second = store.progress_since(&job.id, first.cursor).unwrap();
        assert_eq!(second.checkpoints.len(), 1);
        assert_eq!(second.checkpoints[0].stage, Stage::Visual);
        assert_eq!(second.job.percent, 65);

        let idle = store.progress_since(&job.id, second.cursor).unwrap();
        assert!(idle.checkpoints.is_empty());
    }

    #[test]
    fn test_list_newest_first() {
        let store = JobStore::new();
        let a = store.create("a");
        std::thread::sleep(Duration::from_millis(2));
        let b = store.create("b");
        let ids: Vec<JobId> = store.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_evict_only_old_terminal_jobs() {
        let store = JobStore::new();
        let done = running_job(&store);
        store.complete(&done.id, PathBuf::from("/x"), vec![]).unwrap();
        let active = running_job(&store);

        assert_eq!(store.evict_terminal_older_than(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.evict_terminal_older_than(Duration::ZERO), 1);
        assert!(store.get(&done.id).is_err());
        assert!(store.get(&active.id).is_ok());
    }
}
