//! Scheduler integration tests: concurrent executors against the rate limiter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shortsync_models::{JobPriority, JobStatus, JobType, Payload, PipelineStage};
use shortsync_queue::{PriorityScheduler, QueueConfig, RateLimit};
use shortsync_store::InMemoryGateway;

#[tokio::test]
async fn test_concurrent_executors_never_exceed_type_cap() {
    let config = QueueConfig::default().with_limit(JobType::VideoAssembly, RateLimit::new(2, 100));
    let scheduler = Arc::new(PriorityScheduler::new(config, Arc::new(InMemoryGateway::new())));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            scheduler
                .create_job(JobType::VideoAssembly, JobPriority::Normal, Payload::new())
                .await
                .unwrap(),
        );
    }

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut tasks = tokio::task::JoinSet::new();
    let mut released = 0;

    while released < 5 {
        let Some(claimed) = scheduler.dequeue(Duration::from_millis(20)).await else {
            tokio::time::sleep(Duration::from_millis(5)).await;
            continue;
        };
        released += 1;

        let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now_running, Ordering::SeqCst);

        let scheduler = scheduler.clone();
        let running = running.clone();
        tasks.spawn(async move {
            let mut job = claimed.job;
            tokio::time::sleep(Duration::from_millis(30)).await;
            job.complete(Payload::new(), Utc::now()).unwrap();
            running.fetch_sub(1, Ordering::SeqCst);
            scheduler.finish(job).await.unwrap();
        });
    }
    while tasks.join_next().await.is_some() {}

    assert!(peak.load(Ordering::SeqCst) <= 2);
    for id in &ids {
        let status = scheduler.get_status(id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
    }

    let stats = scheduler.queue_stats().await;
    let video = &stats.per_type[&JobType::VideoAssembly];
    assert_eq!(video.counters.total, 5);
    assert_eq!(video.counters.completed, 5);
    assert_eq!(video.in_flight, 0);
    assert_eq!(video.calls_in_window, 5);
}

#[tokio::test]
async fn test_stage_monotonicity_through_scheduler() {
    let scheduler = PriorityScheduler::new(QueueConfig::default(), Arc::new(InMemoryGateway::new()));
    let id = scheduler
        .create_job(JobType::PipelineExecution, JobPriority::High, Payload::new())
        .await
        .unwrap();
    scheduler.dequeue(Duration::from_millis(10)).await.unwrap();

    assert!(
        scheduler
            .advance_stage(&id, PipelineStage::ScriptGeneration, 0.2, None)
            .await
    );
    assert!(!scheduler.advance_stage(&id, PipelineStage::Idle, 0.0, None).await);
    assert!(
        scheduler
            .advance_stage(&id, PipelineStage::Completed, 1.0, None)
            .await
    );
    assert!(
        !scheduler
            .advance_stage(&id, PipelineStage::VideoAssembly, 0.5, None)
            .await
    );

    let run = scheduler.get_run(&id).await.unwrap();
    assert_eq!(run.stage, PipelineStage::Completed);
    assert!(run.end_time.is_some());
}
