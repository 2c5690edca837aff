//! Executor integration tests: stage failures, timeouts, panics and
//! cooperative cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shortsync_models::{JobPriority, JobStatus, JobType, Payload, PipelineStage};
use shortsync_queue::{ClaimedJob, PriorityScheduler, QueueConfig};
use shortsync_store::InMemoryGateway;
use shortsync_worker::{
    stage_fn, CircuitBreakerConfig, JobExecutor, SharedStage, StageContext, StageRegistry,
    StageResult, WorkerConfig,
};
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_millis(50);

fn ok_stage(key: &'static str) -> SharedStage {
    stage_fn(move |ctx: StageContext| async move {
        let mut data = Payload::new();
        data.insert(key.to_string(), ctx.stage.as_str().into());
        StageResult::ok(data)
    })
}

fn counting(calls: Arc<AtomicU32>) -> SharedStage {
    stage_fn(move |_ctx: StageContext| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            StageResult::ok(Payload::new())
        }
    })
}

fn short_pipeline() -> [PipelineStage; 4] {
    [
        PipelineStage::TrendDetection,
        PipelineStage::ScriptGeneration,
        PipelineStage::AssetGathering,
        PipelineStage::VoiceoverGeneration,
    ]
}

fn scheduler() -> Arc<PriorityScheduler> {
    Arc::new(PriorityScheduler::new(
        QueueConfig::default(),
        Arc::new(InMemoryGateway::new()),
    ))
}

async fn claim(scheduler: &PriorityScheduler, job_type: JobType) -> ClaimedJob {
    scheduler
        .create_job(job_type, JobPriority::Normal, Payload::new())
        .await
        .unwrap();
    scheduler.dequeue(WAIT).await.unwrap()
}

#[tokio::test]
async fn test_full_pipeline_accumulates_stage_data() {
    let scheduler = scheduler();
    let registry = StageRegistry::builder()
        .stage(PipelineStage::TrendDetection, ok_stage("topic"))
        .stage(PipelineStage::ScriptGeneration, ok_stage("script"))
        .stage(PipelineStage::AssetGathering, ok_stage("assets"))
        .stage(PipelineStage::VoiceoverGeneration, ok_stage("voiceover"))
        .plan(JobType::PipelineExecution, &short_pipeline())
        .build(&[JobType::PipelineExecution])
        .unwrap();
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), WorkerConfig::default());

    let claimed = claim(&scheduler, JobType::PipelineExecution).await;
    let job_id = claimed.job.id.clone();
    let result = executor.run(claimed).await.unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    let data = result.result.unwrap();
    assert_eq!(data["script"], "script_generation");
    assert_eq!(data["voiceover"], "voiceover_generation");

    let run = scheduler.get_run(&job_id).await.unwrap();
    assert_eq!(run.stage, PipelineStage::Completed);
    assert_eq!(run.progress, 1.0);
    assert!(run.end_time.is_some());
    assert_eq!(run.metadata["assets"], "asset_gathering");
}

#[tokio::test]
async fn test_stage_failure_names_stage_and_stops_pipeline() {
    let scheduler = scheduler();
    let voiceover_calls = Arc::new(AtomicU32::new(0));
    let registry = StageRegistry::builder()
        .stage(PipelineStage::TrendDetection, ok_stage("topic"))
        .stage(PipelineStage::ScriptGeneration, ok_stage("script"))
        .stage(
            PipelineStage::AssetGathering,
            stage_fn(|_ctx: StageContext| async { StageResult::failure("no assets") }),
        )
        .stage(PipelineStage::VoiceoverGeneration, counting(voiceover_calls.clone()))
        .plan(JobType::PipelineExecution, &short_pipeline())
        .build(&[JobType::PipelineExecution])
        .unwrap();
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), WorkerConfig::default());

    let claimed = claim(&scheduler, JobType::PipelineExecution).await;
    let job_id = claimed.job.id.clone();
    let result = executor.run(claimed).await.unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.failed_stage, Some(PipelineStage::AssetGathering));
    assert_eq!(
        result.error.as_deref(),
        Some("Stage asset_gathering failed: no assets")
    );
    assert!(result.result.is_none());
    assert_eq!(voiceover_calls.load(Ordering::SeqCst), 0);

    let run = scheduler.get_run(&job_id).await.unwrap();
    assert_eq!(run.stage, PipelineStage::Failed);
    assert!(run.end_time.is_some());

    let stats = scheduler.queue_stats().await;
    assert_eq!(stats.active, 0);
    assert_eq!(stats.per_type[&JobType::PipelineExecution].in_flight, 0);
    assert_eq!(stats.per_type[&JobType::PipelineExecution].counters.failed, 1);
}

#[tokio::test]
async fn test_stage_timeout_is_stage_failure() {
    let scheduler = scheduler();
    let registry = StageRegistry::builder()
        .stage(
            PipelineStage::VideoAssembly,
            stage_fn(|_ctx: StageContext| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StageResult::ok(Payload::new())
            }),
        )
        .build(&[JobType::VideoAssembly])
        .unwrap();
    let config = WorkerConfig::default()
        .with_stage_timeout(PipelineStage::VideoAssembly, Duration::from_millis(50));
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), config);

    let claimed = claim(&scheduler, JobType::VideoAssembly).await;
    let result = executor.run(claimed).await.unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.failed_stage, Some(PipelineStage::VideoAssembly));
    assert_eq!(
        result.error.as_deref(),
        Some("Stage video_assembly failed: timed out after 50ms")
    );
}

#[tokio::test]
async fn test_panicking_stage_fails_only_its_job() {
    let scheduler = scheduler();
    let registry = StageRegistry::builder()
        .stage(
            PipelineStage::QualityCheck,
            stage_fn(|ctx: StageContext| async move {
                if ctx.payload.contains_key("explode") {
                    panic!("boom");
                }
                StageResult::ok(Payload::new())
            }),
        )
        .build(&[JobType::QualityCheck])
        .unwrap();
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), WorkerConfig::default());

    let mut payload = Payload::new();
    payload.insert("explode".into(), true.into());
    scheduler
        .create_job(JobType::QualityCheck, JobPriority::High, payload)
        .await
        .unwrap();
    let panicking = scheduler.dequeue(WAIT).await.unwrap();
    let result = executor.run(panicking).await.unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("Stage quality_check failed: panicked: boom")
    );

    let healthy = claim(&scheduler, JobType::QualityCheck).await;
    let result = executor.run(healthy).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cancel_stops_at_next_stage_boundary() {
    let scheduler = scheduler();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let second_calls = Arc::new(AtomicU32::new(0));

    let first: SharedStage = {
        let entered = entered.clone();
        let release = release.clone();
        stage_fn(move |_ctx: StageContext| {
            let entered = entered.clone();
            let release = release.clone();
            async move {
                entered.notify_one();
                release.notified().await;
                StageResult::ok(Payload::new())
            }
        })
    };
    let registry = StageRegistry::builder()
        .stage(PipelineStage::TrendDetection, first)
        .stage(PipelineStage::ScriptGeneration, counting(second_calls.clone()))
        .plan(
            JobType::PipelineExecution,
            &[PipelineStage::TrendDetection, PipelineStage::ScriptGeneration],
        )
        .build(&[JobType::PipelineExecution])
        .unwrap();
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), WorkerConfig::default());

    let claimed = claim(&scheduler, JobType::PipelineExecution).await;
    let job_id = claimed.job.id.clone();
    let signal = claimed.cancel.clone();
    let run = tokio::spawn(async move { executor.run(claimed).await });

    entered.notified().await;
    let cancel = {
        let scheduler = scheduler.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { scheduler.cancel(&job_id).await })
    };
    while !signal.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    release.notify_one();

    let result = run.await.unwrap().unwrap();
    assert!(cancel.await.unwrap());
    assert_eq!(result.status, JobStatus::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let run = scheduler.get_run(&job_id).await.unwrap();
    assert_eq!(run.stage, PipelineStage::Failed);
    assert_eq!(run.error_message.as_deref(), Some("cancelled"));
    assert_eq!(scheduler.active_count().await, 0);
}

#[tokio::test]
async fn test_unplanned_type_fails_without_stage() {
    let scheduler = scheduler();
    let registry = StageRegistry::builder()
        .stage(PipelineStage::ScriptGeneration, ok_stage("script"))
        .build(&[JobType::ScriptGeneration])
        .unwrap();
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), WorkerConfig::default());

    let claimed = claim(&scheduler, JobType::YoutubeUpload).await;
    let result = executor.run(claimed).await.unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.failed_stage, None);
    assert!(result.error.unwrap().contains("youtube_upload"));
}

fn crash(message: &str) -> StageResult {
    panic!("{message}")
}

fn tripping_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 1,
        recovery_timeout: Duration::from_secs(300),
        success_threshold: 1,
    }
}

async fn run_three(
    stage: SharedStage,
    config: WorkerConfig,
) -> Vec<shortsync_models::JobResult> {
    let scheduler = scheduler();
    let registry = StageRegistry::builder()
        .stage(PipelineStage::YoutubeUpload, stage)
        .circuit_breaker(tripping_breaker())
        .build(&[JobType::YoutubeUpload])
        .unwrap();
    let executor = JobExecutor::new(scheduler.clone(), Arc::new(registry), config);

    let mut results = Vec::new();
    for _ in 0..3 {
        let claimed = claim(&scheduler, JobType::YoutubeUpload).await;
        results.push(executor.run(claimed).await.unwrap());
    }
    results
}

#[tokio::test]
async fn test_stage_timeouts_open_circuit_breaker() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let hanging = stage_fn(move |_ctx: StageContext| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            StageResult::ok(Payload::new())
        }
    });
    let config = WorkerConfig::default()
        .with_stage_timeout(PipelineStage::YoutubeUpload, Duration::from_millis(20));

    let results = run_three(hanging, config).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results[0].error.as_deref().unwrap().contains("timed out after 20ms"));
    for result in &results[1..] {
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Stage youtube_upload failed: circuit open for youtube_upload")
        );
    }
}

#[tokio::test]
async fn test_stage_panics_open_circuit_breaker() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let panicking = stage_fn(move |_ctx: StageContext| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            crash("upload client crashed")
        }
    });

    let results = run_three(panicking, WorkerConfig::default()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results[0].error.as_deref().unwrap().contains("panicked: upload client crashed"));
    assert!(results[2].error.as_deref().unwrap().contains("circuit open"));
}
