//! Multi-step agent workflows.
//!
//! A workflow is a fixed sequence of named steps. [`StepRunner`] drives each
//! step through the retry policy, forwards attempt history to a
//! [`ProgressSink`], checks for cancellation between steps, and checkpoints
//! the accumulated state so that an interrupted run can resume.
//!
//! ```text
//!   restore checkpoint
//!          │
//!   ┌──────▼──────┐  done before?  ┌──────────────┐
//!   │  next step  │───────────────▶│ report skip  │
//!   └──────┬──────┘                └──────────────┘
//!          │ cancelled? ──▶ Error::Cancelled
//!   ┌──────▼──────┐
//!   │ retry policy│──▶ attempt / final AgentStep ──▶ ProgressSink
//!   └──────┬──────┘
//!          │ value or fallback
//!   ┌──────▼──────┐
//!   │ save ckpt   │
//!   └─────────────┘
//! ```

pub mod credibility;
pub mod industry;
#[cfg(test)]
pub(crate) mod testing;

pub use credibility::{parse_credibility_query, CredibilityVerificationWorkflow};
pub use industry::IndustryResearchWorkflow;

use async_trait::async_trait;
use intel_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::domain::{AgentStep, TaskId, TaskResult, TaskStatus};
use crate::providers::{AnnouncementDataProvider, NewsDataProvider};
use crate::reasoning::{complete_json, ReasoningClient};
use crate::retry::{RetryPolicy, StepEvent, StepObserver};
use crate::storage::CheckpointStore;

/// Analysis text substituted when a step exhausts its retries.
pub const FAILED_TEXT: &str = "[分析失败]";

/// Score substituted when a scoring step exhausts its retries.
pub const FALLBACK_SCORE: u8 = 50;

// ============================================================================
// Collaborators
// ============================================================================

/// Receives the step history of a running task.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: u8, step: AgentStep);
}

/// Lets a workflow observe cancellation between steps.
pub trait TaskStatusProbe: Send + Sync {
    /// Current status, or `None` if the task no longer exists.
    fn current_status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>>;
}

/// Per-run collaborators handed to a workflow by the task service.
#[derive(Clone)]
pub struct RunContext {
    pub task_id: TaskId,
    /// Task progress already recorded when the run starts
    pub progress: u8,
    pub sink: Arc<dyn ProgressSink>,
    pub probe: Arc<dyn TaskStatusProbe>,
}

/// Shared dependencies of both workflows.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub reasoning: Arc<dyn ReasoningClient>,
    pub news: Arc<dyn NewsDataProvider>,
    pub announcements: Arc<dyn AnnouncementDataProvider>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub retry: RetryPolicy,
    pub news_days: u32,
    pub announcement_days: u32,
}

/// A runnable investigation pipeline.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Stable name, used in checkpoint keys.
    fn name(&self) -> &'static str;

    async fn execute(&self, query: &str, ctx: RunContext) -> Result<TaskResult>;

    fn checkpoint_key(&self, task_id: &TaskId) -> String {
        format!("{}:{}", self.name(), task_id)
    }
}

// ============================================================================
// Steps and checkpoints
// ============================================================================

/// Static description of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDescriptor {
    pub key: &'static str,
    pub display_name: &'static str,
    /// Task progress once the step is done
    pub progress: u8,
}

/// Persisted intermediate state of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub degraded_steps: Vec<String>,
    /// Steps completed locally without calling out
    #[serde(default)]
    pub derived_steps: Vec<String>,
    #[serde(default)]
    pub progress: u8,
    pub state: S,
}

impl<S: Default> Default for Checkpoint<S> {
    fn default() -> Self {
        Self {
            completed_steps: Vec::new(),
            degraded_steps: Vec::new(),
            derived_steps: Vec::new(),
            progress: 0,
            state: S::default(),
        }
    }
}

/// Forwards retry events to the sink at the right progress value.
struct SinkObserver<'a> {
    sink: &'a dyn ProgressSink,
    current_progress: u8,
    step_progress: u8,
}

#[async_trait]
impl StepObserver for SinkObserver<'_> {
    async fn on_event(&self, event: StepEvent) {
        let progress = if event.is_final() {
            self.step_progress.max(self.current_progress)
        } else {
            self.current_progress
        };
        self.sink.report(progress, event.to_agent_step()).await;
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Drives the steps of one workflow run.
pub struct StepRunner<S> {
    workflow: &'static str,
    key: String,
    policy: RetryPolicy,
    checkpoints: Arc<dyn CheckpointStore>,
    ctx: RunContext,
    checkpoint: Checkpoint<S>,
    steps_run: usize,
    last_error: Option<Error>,
}

impl<S> StepRunner<S>
where
    S: Serialize + DeserializeOwned + Default + Send + Sync,
{
    /// Create a runner, restoring any checkpoint left by an earlier run.
    pub fn new(
        workflow: &'static str,
        policy: RetryPolicy,
        checkpoints: Arc<dyn CheckpointStore>,
        ctx: RunContext,
    ) -> Self {
        let key = format!("{}:{}", workflow, ctx.task_id);
        let mut checkpoint = match checkpoints.load(&key) {
            Ok(Some(value)) => match serde_json::from_value::<Checkpoint<S>>(value) {
                Ok(restored) => {
                    tracing::info!(
                        task_id = %ctx.task_id,
                        workflow,
                        completed = restored.completed_steps.len(),
                        "Resuming workflow from checkpoint"
                    );
                    restored
                }
                Err(e) => {
                    tracing::warn!(task_id = %ctx.task_id, workflow, error = %e, "Discarding unreadable checkpoint");
                    Checkpoint::default()
                }
            },
            Ok(None) => Checkpoint::default(),
            Err(e) => {
                tracing::warn!(task_id = %ctx.task_id, workflow, error = %e, "Checkpoint load failed, starting fresh");
                Checkpoint::default()
            }
        };

        // Reports made before the last checkpoint save are already on the task.
        checkpoint.progress = checkpoint.progress.max(ctx.progress);

        Self {
            workflow,
            key,
            policy,
            checkpoints,
            ctx,
            checkpoint,
            steps_run: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &S {
        &self.checkpoint.state
    }

    pub fn task_id(&self) -> &TaskId {
        &self.ctx.task_id
    }

    pub fn is_completed(&self, step: &StepDescriptor) -> bool {
        self.checkpoint.completed_steps.iter().any(|k| k == step.key)
    }

    /// Run one step and merge its output (or fallback) into the state.
    pub async fn run_step<T, F, Fut, A>(
        &mut self,
        step: &StepDescriptor,
        fallback: T,
        op: F,
        apply: A,
    ) -> Result<()>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        A: FnOnce(&mut S, T) + Send,
    {
        if self.is_completed(step) {
            tracing::debug!(task_id = %self.ctx.task_id, step = step.key, "Step restored from checkpoint");
            let progress = self.checkpoint.progress.max(step.progress);
            self.ctx
                .sink
                .report(progress, AgentStep::skipped(step.display_name))
                .await;
            return Ok(());
        }

        self.ensure_not_cancelled()?;

        tracing::info!(task_id = %self.ctx.task_id, step = step.key, "Running workflow step");
        let observer = SinkObserver {
            sink: self.ctx.sink.as_ref(),
            current_progress: self.checkpoint.progress,
            step_progress: step.progress,
        };
        let outcome = self
            .policy
            .run_or_fallback(step.display_name, &observer, fallback, op)
            .await?;

        self.steps_run += 1;
        if outcome.degraded {
            self.checkpoint.degraded_steps.push(step.key.to_string());
            self.last_error = outcome.last_error;
        }

        apply(&mut self.checkpoint.state, outcome.value);
        self.checkpoint.completed_steps.push(step.key.to_string());
        self.checkpoint.progress = self.checkpoint.progress.max(step.progress);
        self.save_checkpoint();
        Ok(())
    }

    /// Record a step whose output needs no external call.
    pub async fn complete_locally<T, A>(
        &mut self,
        step: &StepDescriptor,
        value: T,
        summary: &str,
        apply: A,
    ) -> Result<()>
    where
        A: FnOnce(&mut S, T),
    {
        if self.is_completed(step) {
            let progress = self.checkpoint.progress.max(step.progress);
            self.ctx
                .sink
                .report(progress, AgentStep::skipped(step.display_name))
                .await;
            return Ok(());
        }

        self.ensure_not_cancelled()?;

        let done = AgentStep::completed(step.display_name, chrono::Utc::now(), summary);
        let progress = self.checkpoint.progress.max(step.progress);
        self.ctx.sink.report(progress, done).await;

        apply(&mut self.checkpoint.state, value);
        self.checkpoint.completed_steps.push(step.key.to_string());
        self.checkpoint.derived_steps.push(step.key.to_string());
        self.checkpoint.progress = self.checkpoint.progress.max(step.progress);
        self.save_checkpoint();
        Ok(())
    }

    /// Finish the run and hand back the accumulated state.
    ///
    /// Fails when no step produced real output.
    pub fn finish(self) -> Result<S> {
        let called_out =
            self.checkpoint.completed_steps.len() - self.checkpoint.derived_steps.len();
        let all_degraded = called_out > 0 && self.checkpoint.degraded_steps.len() == called_out;

        if let Err(e) = self.checkpoints.delete(&self.key) {
            tracing::warn!(key = %self.key, error = %e, "Failed to delete checkpoint");
        }

        if all_degraded {
            tracing::error!(
                task_id = %self.ctx.task_id,
                workflow = self.workflow,
                "Every workflow step degraded, no usable result"
            );
            return Err(self.last_error.unwrap_or_else(|| {
                Error::Service(format!("{} 的所有分析步骤均失败", self.workflow))
            }));
        }

        tracing::info!(
            task_id = %self.ctx.task_id,
            workflow = self.workflow,
            steps_run = self.steps_run,
            degraded = self.checkpoint.degraded_steps.len(),
            "Workflow finished"
        );
        Ok(self.checkpoint.state)
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        match self.ctx.probe.current_status(&self.ctx.task_id) {
            Ok(Some(TaskStatus::Running)) => Ok(()),
            Ok(status) => {
                tracing::info!(
                    task_id = %self.ctx.task_id,
                    status = ?status,
                    "Task no longer running, stopping workflow"
                );
                Err(Error::Cancelled(self.ctx.task_id.to_string()))
            }
            Err(e) => {
                tracing::warn!(task_id = %self.ctx.task_id, error = %e, "Status probe failed, continuing");
                Ok(())
            }
        }
    }

    fn save_checkpoint(&self) {
        let saved = serde_json::to_value(&self.checkpoint)
            .map_err(Error::from)
            .and_then(|value| self.checkpoints.save(&self.key, &value));
        if let Err(e) = saved {
            tracing::warn!(key = %self.key, error = %e, "Failed to save checkpoint");
        }
    }
}

// ============================================================================
// Output decoding helpers
// ============================================================================

/// Ask the reasoning client for JSON and decode it into `T`.
///
/// A reply that does not fit `T` is a service error, so it is retried.
pub async fn ask_json<T: DeserializeOwned>(reasoning: &dyn ReasoningClient, prompt: &str) -> Result<T> {
    let value = complete_json(reasoning, prompt).await?;
    serde_json::from_value(value)
        .map_err(|e| Error::Service(format!("模型输出结构不符合预期: {}", e)))
}

/// Accept integers, floats and numeric strings, clamped to 0-100.
pub(crate) fn lenient_score<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let raw = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(raw
        .filter(|v| v.is_finite())
        .map(|v| v.trunc().clamp(0.0, 100.0) as u8)
        .unwrap_or(FALLBACK_SCORE))
}

pub(crate) fn fallback_score() -> u8 {
    FALLBACK_SCORE
}

/// Truncate to at most `max` characters for prompt context.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentStepStatus;
    use crate::storage::InMemoryCheckpointStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<(u8, AgentStep)>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, progress: u8, step: AgentStep) {
            self.reports.lock().unwrap().push((progress, step));
        }
    }

    struct FixedStatus(Mutex<Option<TaskStatus>>);

    impl TaskStatusProbe for FixedStatus {
        fn current_status(&self, _task_id: &TaskId) -> Result<Option<TaskStatus>> {
            Ok(*self.0.lock().unwrap())
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        values: Vec<u32>,
    }

    const STEP_A: StepDescriptor = StepDescriptor {
        key: "a",
        display_name: "步骤A",
        progress: 30,
    };
    const STEP_B: StepDescriptor = StepDescriptor {
        key: "b",
        display_name: "步骤B",
        progress: 60,
    };

    fn context(sink: Arc<RecordingSink>, status: TaskStatus) -> (RunContext, Arc<FixedStatus>) {
        let probe = Arc::new(FixedStatus(Mutex::new(Some(status))));
        (
            RunContext {
                task_id: TaskId::new(),
                progress: 0,
                sink,
                probe: probe.clone(),
            },
            probe,
        )
    }

    #[tokio::test]
    async fn test_attempts_reported_at_current_then_step_progress() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (ctx, _) = context(sink.clone(), TaskStatus::Running);
        let mut runner: StepRunner<Counter> =
            StepRunner::new("test", RetryPolicy::immediate(3), store.clone(), ctx);

        runner
            .run_step(&STEP_A, 0, || async { Ok(1) }, |s, v| s.values.push(v))
            .await
            .unwrap();

        let mut calls = 0;
        runner
            .run_step(
                &STEP_B,
                0,
                || {
                    calls += 1;
                    let n = calls;
                    async move {
                        if n == 1 {
                            Err(Error::Service("HTTP 503".into()))
                        } else {
                            Ok(2)
                        }
                    }
                },
                |s, v| s.values.push(v),
            )
            .await
            .unwrap();

        let reports = sink.reports.lock().unwrap().clone();
        let summary: Vec<_> = reports.iter().map(|(p, s)| (*p, s.status)).collect();
        assert_eq!(
            summary,
            vec![
                (30, AgentStepStatus::Completed),
                (30, AgentStepStatus::Failed),
                (60, AgentStepStatus::Completed),
            ]
        );

        let state = runner.finish().unwrap();
        assert_eq!(state.values, vec![1, 2]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (ctx, _) = context(sink.clone(), TaskStatus::Running);

        let saved = Checkpoint {
            completed_steps: vec!["a".to_string()],
            degraded_steps: vec![],
            derived_steps: vec![],
            progress: 30,
            state: Counter { values: vec![7] },
        };
        store
            .save(
                &format!("test:{}", ctx.task_id),
                &serde_json::to_value(&saved).unwrap(),
            )
            .unwrap();

        let mut runner: StepRunner<Counter> =
            StepRunner::new("test", RetryPolicy::immediate(1), store.clone(), ctx);
        assert!(runner.is_completed(&STEP_A));

        let mut ran = false;
        runner
            .run_step(
                &STEP_A,
                0,
                || {
                    ran = true;
                    async { Ok(0) }
                },
                |s: &mut Counter, v: u32| s.values.push(v),
            )
            .await
            .unwrap();
        assert!(!ran);
        runner
            .run_step(&STEP_B, 0, || async { Ok(8) }, |s, v| s.values.push(v))
            .await
            .unwrap();

        let reports = sink.reports.lock().unwrap().clone();
        assert_eq!(reports[0].1.status, AgentStepStatus::Skipped);
        assert_eq!(reports[0].1.agent_name, "步骤A");
        assert_eq!(runner.finish().unwrap().values, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_resume_never_reports_below_recorded_progress() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (mut ctx, _) = context(sink.clone(), TaskStatus::Running);
        // Step B reported 60 before the process died, its checkpoint never landed.
        ctx.progress = 60;

        let saved = Checkpoint {
            completed_steps: vec!["a".to_string()],
            degraded_steps: vec![],
            derived_steps: vec![],
            progress: 30,
            state: Counter { values: vec![7] },
        };
        store
            .save(
                &format!("test:{}", ctx.task_id),
                &serde_json::to_value(&saved).unwrap(),
            )
            .unwrap();

        let mut runner: StepRunner<Counter> =
            StepRunner::new("test", RetryPolicy::immediate(2), store, ctx);
        runner
            .run_step(&STEP_A, 0, || async { Ok(0) }, |s, v| s.values.push(v))
            .await
            .unwrap();

        let mut calls = 0;
        runner
            .run_step(
                &STEP_B,
                0,
                || {
                    calls += 1;
                    let n = calls;
                    async move {
                        if n == 1 {
                            Err(Error::Service("HTTP 503".into()))
                        } else {
                            Ok(8)
                        }
                    }
                },
                |s, v| s.values.push(v),
            )
            .await
            .unwrap();

        let reports = sink.reports.lock().unwrap().clone();
        let summary: Vec<_> = reports.iter().map(|(p, s)| (*p, s.status)).collect();
        assert_eq!(
            summary,
            vec![
                (60, AgentStepStatus::Skipped),
                (60, AgentStepStatus::Failed),
                (60, AgentStepStatus::Completed),
            ]
        );
        assert_eq!(runner.finish().unwrap().values, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_cancelled_task_stops_before_next_step() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (ctx, probe) = context(sink.clone(), TaskStatus::Running);
        let mut runner: StepRunner<Counter> =
            StepRunner::new("test", RetryPolicy::immediate(1), store.clone(), ctx);

        runner
            .run_step(&STEP_A, 0, || async { Ok(1) }, |s, v| s.values.push(v))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        *probe.0.lock().unwrap() = Some(TaskStatus::Cancelled);
        let mut ran = false;
        let err = runner
            .run_step(
                &STEP_B,
                0,
                || {
                    ran = true;
                    async { Ok(0) }
                },
                |s: &mut Counter, v: u32| s.values.push(v),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_all_degraded_fails_with_last_error() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (ctx, _) = context(sink, TaskStatus::Running);
        let mut runner: StepRunner<Counter> =
            StepRunner::new("test", RetryPolicy::immediate(2), store, ctx);

        for step in [&STEP_A, &STEP_B] {
            runner
                .run_step(
                    step,
                    0,
                    || async { Err::<u32, _>(Error::Timeout("60s".into())) },
                    |s, v| s.values.push(v),
                )
                .await
                .unwrap();
        }

        let err = runner.finish().unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_local_step_does_not_count_as_usable_output() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (ctx, _) = context(sink.clone(), TaskStatus::Running);
        let mut runner: StepRunner<Counter> =
            StepRunner::new("test", RetryPolicy::immediate(1), store, ctx);

        runner
            .run_step(
                &STEP_A,
                0,
                || async { Err::<u32, _>(Error::Service("HTTP 500".into())) },
                |s, v| s.values.push(v),
            )
            .await
            .unwrap();
        runner
            .complete_locally(&STEP_B, 9, "无需调用", |s: &mut Counter, v: u32| s.values.push(v))
            .await
            .unwrap();

        let last = sink.reports.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.0, 60);
        assert_eq!(last.1.output_summary.as_deref(), Some("无需调用"));
        assert!(runner.finish().is_err());
    }

    #[test]
    fn test_lenient_score() {
        #[derive(Deserialize)]
        struct Scored {
            #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
            score: u8,
        }

        let parse = |v: serde_json::Value| serde_json::from_value::<Scored>(v).unwrap().score;
        assert_eq!(parse(serde_json::json!({"score": 72})), 72);
        assert_eq!(parse(serde_json::json!({"score": 150})), 100);
        assert_eq!(parse(serde_json::json!({"score": -3})), 0);
        assert_eq!(parse(serde_json::json!({"score": 64.9})), 64);
        assert_eq!(parse(serde_json::json!({"score": "81"})), 81);
        assert_eq!(parse(serde_json::json!({"score": "高"})), 50);
        assert_eq!(parse(serde_json::json!({})), 50);
    }
}
