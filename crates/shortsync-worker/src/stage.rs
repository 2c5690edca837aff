//! Stage collaborator interface.
//!
//! A stage is an async function from the accumulated run context to a
//! `StageResult`. The executor does not care what a stage does.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use shortsync_models::{JobId, JobType, Payload, PipelineStage};

pub type SharedStage = Arc<dyn StageHandler>;

/// Input handed to a stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub job_type: JobType,
    pub stage: PipelineStage,
    /// Caller-supplied job payload
    pub payload: Payload,
    /// Data produced by the stages that already ran
    pub data: Payload,
    /// Dispatch attempt, starting at 1
    pub attempt: u32,
}

impl StageContext {
    /// Look a key up in the accumulated data, then in the job payload.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key).or_else(|| self.payload.get(key))
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    pub fn ok(data: Payload) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// How a guarded stage call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success(Payload),
    Failure(String),
    TimedOut(Duration),
    Panicked(String),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }

    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Success(_) => "success",
            StageOutcome::Failure(_) => "failure",
            StageOutcome::TimedOut(_) => "timeout",
            StageOutcome::Panicked(_) => "panic",
        }
    }

    /// Failure cause, `None` on success.
    pub fn cause(&self) -> Option<String> {
        match self {
            StageOutcome::Success(_) => None,
            StageOutcome::Failure(cause) => Some(cause.clone()),
            StageOutcome::TimedOut(timeout) => {
                Some(format!("timed out after {}ms", timeout.as_millis()))
            }
            StageOutcome::Panicked(message) => Some(format!("panicked: {message}")),
        }
    }

    fn from_result(result: StageResult) -> Self {
        if result.success {
            StageOutcome::Success(result.data.unwrap_or_default())
        } else {
            StageOutcome::Failure(
                result
                    .error
                    .unwrap_or_else(|| "stage reported failure".to_string()),
            )
        }
    }
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(&self, ctx: StageContext) -> StageResult;

    /// Run under `timeout`, turning panics into `Panicked`. The stage future
    /// is dropped on timeout.
    async fn run_guarded(&self, ctx: StageContext, timeout: Duration) -> StageOutcome {
        let guarded = AssertUnwindSafe(self.run(ctx)).catch_unwind();
        match tokio::time::timeout(timeout, guarded).await {
            Err(_) => StageOutcome::TimedOut(timeout),
            Ok(Err(panic)) => StageOutcome::Panicked(panic_message(&*panic)),
            Ok(Ok(result)) => StageOutcome::from_result(result),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct FnStage<F>(F);

#[async_trait]
impl<F, Fut> StageHandler for FnStage<F>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    async fn run(&self, ctx: StageContext) -> StageResult {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a stage.
pub fn stage_fn<F, Fut>(f: F) -> SharedStage
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    Arc::new(FnStage(f))
}

/// Dry-run stage that only records a completion marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughStage;

#[async_trait]
impl StageHandler for PassthroughStage {
    async fn run(&self, ctx: StageContext) -> StageResult {
        let mut data = Payload::new();
        data.insert(
            format!("{}_completed_at", ctx.stage),
            Utc::now().to_rfc3339().into(),
        );
        StageResult::ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(stage: PipelineStage) -> StageContext {
        let mut payload = Payload::new();
        payload.insert("topic".into(), "rust".into());
        StageContext {
            job_id: JobId::new(),
            job_type: JobType::PipelineExecution,
            stage,
            payload,
            data: Payload::new(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_passthrough_records_marker() {
        let result = PassthroughStage.run(ctx(PipelineStage::VideoAssembly)).await;
        assert!(result.success);
        assert!(result
            .data
            .unwrap()
            .contains_key("video_assembly_completed_at"));
    }

    #[tokio::test]
    async fn test_closure_stage() {
        let stage = stage_fn(|ctx: StageContext| async move {
            match ctx.get("topic").and_then(|v| v.as_str()) {
                Some(topic) => {
                    let mut data = Payload::new();
                    data.insert("script".into(), format!("About {topic}").into());
                    StageResult::ok(data)
                }
                None => StageResult::failure("no topic"),
            }
        });

        let result = stage.run(ctx(PipelineStage::ScriptGeneration)).await;
        assert_eq!(result.data.unwrap()["script"], "About rust");
    }

    fn crash(message: &str) -> StageResult {
        panic!("{message}")
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_run_classifies_outcomes() {
        let slow = stage_fn(|_ctx: StageContext| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StageResult::ok(Payload::new())
        });
        let outcome = slow
            .run_guarded(ctx(PipelineStage::VideoAssembly), Duration::from_millis(250))
            .await;
        assert_eq!(outcome.label(), "timeout");
        assert_eq!(outcome.cause().as_deref(), Some("timed out after 250ms"));

        let panicking = stage_fn(|_ctx: StageContext| async { crash("provider blew up") });
        let outcome = panicking
            .run_guarded(ctx(PipelineStage::VideoAssembly), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, StageOutcome::Panicked("provider blew up".to_string()));

        let failing = stage_fn(|_ctx: StageContext| async { StageResult::failure("no assets") });
        let outcome = failing
            .run_guarded(ctx(PipelineStage::AssetGathering), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.cause().as_deref(), Some("no assets"));
    }

    #[test]
    fn test_result_wire_shape() {
        let result: StageResult =
            serde_json::from_str(r#"{"success": false, "error": "no assets"}"#).unwrap();
        assert_eq!(result, StageResult::failure("no assets"));
    }
}
