mod common;

use std::time::Duration;

use common::{
    orchestrator, orchestrator_with, request, wait_terminal, Behavior, StubExecutor,
};
use pretty_assertions::assert_eq;
use reelforge_pipeline::{
    EventKind, JobStatus, PipelineConfig, PipelineError, ProgressPublisher, Stage, StageRegistry,
};
use tokio_stream::StreamExt;

fn fast_publisher(orchestrator: &reelforge_pipeline::JobOrchestrator) -> ProgressPublisher {
    ProgressPublisher::with_intervals(
        orchestrator.store().clone(),
        Duration::from_millis(20),
        Duration::from_secs(30),
    )
}

fn percentages(events: &[reelforge_pipeline::ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Progress { percentage, .. } => Some(percentage),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn successful_job_streams_every_checkpoint_then_done() {
    let orch = orchestrator(StageRegistry::uniform(StubExecutor::succeeding(200)));
    let publisher = fast_publisher(&orch);

    let job = orch.submit(request(), "scenario-ok").unwrap();
    let first = publisher.subscribe(&job.id).unwrap();
    let second = publisher.subscribe(&job.id).unwrap();

    let (first, second) = tokio::join!(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());

    assert_eq!(percentages(&first), vec![15, 35, 65, 85, 100]);
    assert_eq!(percentages(&second), percentages(&first));

    let last = first.last().unwrap();
    assert_eq!(last.event_name(), "done");
    assert!(first.iter().all(|e| e.correlation_id == "scenario-ok"));

    let stages: Vec<Stage> = first
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::StageComplete { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![Stage::Script, Stage::Audio, Stage::Visual, Stage::Compose, Stage::Finalize]
    );

    let done = orch.get(&job.id).unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.percent, 100);
    assert!(done.output_path.unwrap().ends_with("compose.bin"));
}

#[tokio::test]
async fn cancel_during_audio_stops_before_visual() {
    let visual = StubExecutor::succeeding(200);
    let compose = StubExecutor::succeeding(200);
    let registry = StageRegistry::uniform(StubExecutor::succeeding(200))
        .with(Stage::Visual, visual.clone())
        .with(Stage::Compose, compose.clone());
    let orch = orchestrator(registry);

    let job = orch.submit(request(), "scenario-cancel").unwrap();
    // Script finishes at ~200ms; audio runs until ~400ms.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(orch.cancel_job(&job.id).unwrap());

    let canceled = wait_terminal(&orch, &job.id).await;
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(
        canceled.percent == 15 || canceled.percent == 35,
        "unexpected percent {}",
        canceled.percent
    );
    assert_eq!(visual.calls(), 0);
    assert_eq!(compose.calls(), 0);
    assert!(canceled.output_path.is_none());
}

#[tokio::test]
async fn script_failure_fails_job_without_running_later_stages() {
    let audio = StubExecutor::succeeding(0);
    let registry = StageRegistry::uniform(StubExecutor::succeeding(0))
        .with(
            Stage::Script,
            StubExecutor::new(Duration::from_millis(10), Behavior::Fail("model unavailable")),
        )
        .with(Stage::Audio, audio.clone());
    let orch = orchestrator(registry);

    let job = orch.submit(request(), "scenario-fail").unwrap();
    let events: Vec<_> = fast_publisher(&orch)
        .subscribe(&job.id)
        .unwrap()
        .collect()
        .await;

    let failed = orch.get(&job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.percent, 0);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Script stage failed: model unavailable")
    );
    assert_eq!(audio.calls(), 0);

    assert!(percentages(&events).is_empty());
    assert_eq!(
        events.last().map(|e| e.kind.clone()),
        Some(EventKind::Error {
            message: "Script stage failed: model unavailable".to_string(),
            status: Some(JobStatus::Failed),
        })
    );

    // A failed job ignores cancellation entirely.
    assert!(!orch.cancel_job(&job.id).unwrap());
    assert!(!orch.cancel_job(&job.id).unwrap());
    assert_eq!(orch.get(&job.id).unwrap(), failed);
}

#[tokio::test]
async fn percent_seen_through_get_never_decreases_while_running() {
    let orch = orchestrator(StageRegistry::uniform(StubExecutor::succeeding(200)));
    let job = orch.submit(request(), "scenario-monotonic").unwrap();

    let mut observed = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = orch.get(&job.id).unwrap();
        if snapshot.status == JobStatus::Running {
            observed.push(snapshot.percent);
        }
        if snapshot.is_terminal() {
            assert_eq!(snapshot.status, JobStatus::Done);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(observed.len() > 10, "too few samples: {observed:?}");
    assert!(
        observed.windows(2).all(|pair| pair[0] <= pair[1]),
        "percent went backwards: {observed:?}"
    );
    let mut distinct = observed.clone();
    distinct.dedup();
    assert!(distinct.len() >= 4, "expected several checkpoints: {distinct:?}");
}

#[tokio::test]
async fn error_after_cancellation_counts_as_canceled() {
    let registry = StageRegistry::uniform(StubExecutor::succeeding(0)).with(
        Stage::Script,
        StubExecutor::new(Duration::ZERO, Behavior::ErrorOnCancel),
    );
    let orch = orchestrator(registry);

    let job = orch.submit(request(), "scenario-cancel-error").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.cancel_job(&job.id).unwrap();

    let job = wait_terminal(&orch, &job.id).await;
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn panicking_executor_fails_the_job() {
    let registry = StageRegistry::uniform(StubExecutor::succeeding(0))
        .with(Stage::Visual, StubExecutor::new(Duration::ZERO, Behavior::Panic));
    let orch = orchestrator(registry);

    let job = orch.submit(request(), "scenario-panic").unwrap();
    let job = wait_terminal(&orch, &job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.percent, 35);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("Visual stage panicked"), "{message}");
    assert!(message.contains("visual executor crashed"));
}

#[tokio::test]
async fn unknown_job_is_not_found_everywhere() {
    let orch = orchestrator(StageRegistry::uniform(StubExecutor::succeeding(0)));
    assert!(matches!(orch.get("nope"), Err(PipelineError::NotFound(_))));
    assert!(matches!(orch.cancel_job("nope"), Err(PipelineError::NotFound(_))));
    assert!(matches!(
        fast_publisher(&orch).subscribe("nope"),
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn finished_jobs_ignore_cancel_and_replay_only_terminal_event() {
    let orch = orchestrator(StageRegistry::uniform(StubExecutor::succeeding(0)));
    let job = orch.submit(request(), "scenario-late").unwrap();
    let done = wait_terminal(&orch, &job.id).await;
    assert_eq!(done.status, JobStatus::Done);

    assert!(!orch.cancel_job(&job.id).unwrap());
    assert_eq!(orch.get(&job.id).unwrap().status, JobStatus::Done);

    let events: Vec<_> = fast_publisher(&orch)
        .subscribe(&job.id)
        .unwrap()
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name(), "done");
}

#[tokio::test]
async fn queued_job_can_be_canceled_and_ceiling_rejects_extra_work() {
    let config = PipelineConfig {
        max_concurrent_jobs: 1,
        max_queued_jobs: 1,
        ..PipelineConfig::default()
    };
    let orch = orchestrator_with(StageRegistry::uniform(StubExecutor::succeeding(100)), config);

    let running = orch.submit(request(), "first").unwrap();
    let queued = orch.submit(request(), "second").unwrap();
    let rejected = orch.submit(request(), "third");
    assert!(matches!(
        rejected,
        Err(PipelineError::ResourceExhausted { limit: 2 })
    ));
    assert_eq!(orch.store().len(), 2);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(orch.get(&queued.id).unwrap().status, JobStatus::Queued);
    assert!(orch.cancel_job(&queued.id).unwrap());

    let canceled = wait_terminal(&orch, &queued.id).await;
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.percent, 0);
    assert_eq!(canceled.stage, None);

    assert_eq!(wait_terminal(&orch, &running.id).await.status, JobStatus::Done);
}

#[tokio::test]
async fn retention_evicts_only_old_terminal_jobs() {
    let orch = orchestrator(StageRegistry::uniform(StubExecutor::succeeding(0)));
    let job = orch.submit(request(), "scenario-evict").unwrap();
    wait_terminal(&orch, &job.id).await;

    assert_eq!(orch.store().evict_terminal_older_than(Duration::from_secs(3600)), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orch.store().evict_terminal_older_than(Duration::from_millis(1)), 1);
    assert!(matches!(orch.get(&job.id), Err(PipelineError::NotFound(_))));
}
