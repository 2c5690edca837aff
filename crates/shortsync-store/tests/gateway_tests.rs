//! Gateway integration tests: snapshot round trip and Redis backend.

use chrono::Utc;
use shortsync_models::{
    Job, JobCounters, JobPriority, JobStatus, JobType, Payload, PendingEntry, PipelineRun,
    PipelineStage, QueueSnapshot,
};
use shortsync_store::{FileGateway, PersistenceGateway, RedisGateway, RetryConfig};

fn populated_snapshot() -> QueueSnapshot {
    let mut snapshot = QueueSnapshot::empty(Utc::now());

    for (sequence, priority) in [(1, JobPriority::Low), (2, JobPriority::Critical)] {
        let mut payload = Payload::new();
        payload.insert("topic".into(), format!("topic-{sequence}").into());
        snapshot.pending.push(PendingEntry {
            sequence,
            job: Job::new(JobType::ScriptGeneration, priority, payload),
        });
    }

    let mut running = Job::new(JobType::PipelineExecution, JobPriority::High, Payload::new());
    running.start(Utc::now()).unwrap();
    let mut run = PipelineRun::new(running.id.clone());
    run.stage = PipelineStage::VoiceoverGeneration;
    run.progress = 0.45;
    run.metadata.insert("script".into(), "draft".into());
    run.start_time = Some(Utc::now());
    snapshot.jobs.push(running);
    snapshot.pipelines.push(run);

    snapshot.counters.insert(
        JobType::ScriptGeneration,
        JobCounters {
            total: 5,
            completed: 2,
            failed: 1,
            cancelled: 0,
        },
    );

    snapshot.normalized()
}

#[tokio::test]
async fn test_file_snapshot_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FileGateway::open(dir.path()).await.unwrap();

    gateway.save_snapshot(&populated_snapshot()).await.unwrap();
    let first = tokio::fs::read(gateway.snapshot_path()).await.unwrap();

    let loaded = gateway.load_snapshot().await.unwrap().unwrap();
    gateway.save_snapshot(&loaded).await.unwrap();
    let second = tokio::fs::read(gateway.snapshot_path()).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_file_snapshot_rejects_future_version() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FileGateway::open(dir.path()).await.unwrap();

    let mut snapshot = populated_snapshot();
    snapshot.version = 2;
    gateway.save_snapshot(&snapshot).await.unwrap();

    assert!(gateway.load_snapshot().await.is_err());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_snapshot_and_job_records() {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let prefix = format!("shortsync-test-{}", uuid_like());
    let gateway = RedisGateway::new(&url, RetryConfig::default())
        .expect("Failed to create gateway")
        .with_prefix(prefix);

    gateway.ping().await.expect("Redis not reachable");

    let snapshot = populated_snapshot();
    gateway.save_snapshot(&snapshot).await.unwrap();
    let loaded = gateway.load_snapshot().await.unwrap().unwrap();
    assert_eq!(loaded, snapshot);

    let job = Job::new(JobType::YoutubeUpload, JobPriority::Normal, Payload::new());
    gateway.save_job(&job).await.unwrap();
    gateway
        .update_job_status(&job.id, JobStatus::Failed, None, Some("quota exceeded"))
        .await
        .unwrap();
    let stored = gateway.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("quota exceeded"));
}

fn uuid_like() -> String {
    shortsync_models::JobId::new().to_string()
}
