//! Investigation task application service.
//!
//! Owns the task lifecycle: creation, background workflow execution,
//! progress persistence, cancellation and deletion. Every mutation of a
//! task goes through a per-task async mutex so that the workflow's progress
//! writes and a concurrent cancel never interleave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intel_common::{Error, Result, TasksConfig};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    AgentStep, FailureCode, InvestigationTask, StockCode, TaskId, TaskStatus, TaskType,
};
use crate::events::EventEmitter;
use crate::storage::{CheckpointStore, TaskRepository};
use crate::workflow::{parse_credibility_query, ProgressSink, RunContext, TaskStatusProbe, Workflow};

/// Message recorded when the task deadline expires.
const TIMEOUT_MESSAGE: &str = "分析超时";

/// Tunables of the task service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub task_timeout: Duration,
    pub default_list_limit: usize,
    pub max_list_limit: usize,
    /// Spawn the workflow right after creating a task
    pub auto_launch: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&TasksConfig::default())
    }
}

impl ServiceSettings {
    pub fn from_config(config: &TasksConfig) -> Self {
        Self {
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            default_list_limit: config.default_list_limit.max(1),
            max_list_limit: config.max_list_limit.max(1),
            auto_launch: true,
        }
    }

    pub fn with_auto_launch(mut self, auto_launch: bool) -> Self {
        self.auto_launch = auto_launch;
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }
}

/// Coordinates tasks, workflows, storage and events.
pub struct InvestigationTaskService {
    repository: Arc<dyn TaskRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventEmitter>,
    industry: Arc<dyn Workflow>,
    credibility: Arc<dyn Workflow>,
    settings: ServiceSettings,
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
    active: Mutex<HashSet<TaskId>>,
}

impl InvestigationTaskService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventEmitter>,
        industry: Arc<dyn Workflow>,
        credibility: Arc<dyn Workflow>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            repository,
            checkpoints,
            events,
            industry,
            credibility,
            settings,
            locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub async fn create_industry_research_task(self: &Arc<Self>, query: &str) -> Result<TaskId> {
        self.create(TaskType::IndustryResearch, query).await
    }

    pub async fn create_credibility_verification_task(
        self: &Arc<Self>,
        stock_code: &str,
        concept: &str,
    ) -> Result<TaskId> {
        let code = StockCode::parse(stock_code)?;
        let concept = concept.trim();
        if concept.is_empty() {
            return Err(Error::Validation("概念不能为空".into()));
        }
        self.create(TaskType::CredibilityVerification, &format!("{}:{}", code, concept))
            .await
    }

    /// Create a task of either type from a raw query.
    ///
    /// Credibility queries must have the `"{stock_code}:{concept}"` form.
    pub async fn create_task(self: &Arc<Self>, query: &str, task_type: TaskType) -> Result<TaskId> {
        match task_type {
            TaskType::IndustryResearch => self.create_industry_research_task(query).await,
            TaskType::CredibilityVerification => {
                let (code, concept) = parse_credibility_query(query)?;
                self.create_credibility_verification_task(code.code(), &concept)
                    .await
            }
        }
    }

    async fn create(self: &Arc<Self>, task_type: TaskType, query: &str) -> Result<TaskId> {
        let task = InvestigationTask::new(task_type, query)?;
        let task_id = *task.task_id();
        self.repository.save(&task)?;

        tracing::info!(
            task_id = %task_id,
            task_type = task_type.as_str(),
            query = task.query(),
            "Investigation task created"
        );

        if self.settings.auto_launch {
            self.launch(&task_id)?;
        }
        Ok(task_id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_task(&self, task_id: &TaskId) -> Result<Option<InvestigationTask>> {
        self.repository.find_by_id(task_id)
    }

    /// List tasks, newest first.
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<InvestigationTask>> {
        let limit = limit
            .unwrap_or(self.settings.default_list_limit)
            .clamp(1, self.settings.max_list_limit);

        match status {
            Some(status) => Ok(self
                .repository
                .find_by_status(status, limit.saturating_add(offset))?
                .into_iter()
                .skip(offset)
                .take(limit)
                .collect()),
            None => self.repository.find_recent(limit, offset),
        }
    }

    /// Every task in `status`, unbounded. Used by startup recovery.
    pub fn all_in_status(&self, status: TaskStatus) -> Result<Vec<InvestigationTask>> {
        self.repository.find_by_status(status, usize::MAX)
    }

    pub fn find_stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<InvestigationTask>> {
        self.repository.find_stale_running(older_than)
    }

    pub fn count_by_status(&self, status: TaskStatus) -> Result<usize> {
        self.repository.count_by_status(status)
    }

    /// Whether a workflow for the task is executing in this process.
    pub fn is_active(&self, task_id: &TaskId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(task_id))
            .unwrap_or(false)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<InvestigationTask> {
        let task = self.mutate(task_id, |t| t.cancel()).await?;
        self.release_lock(task_id);
        tracing::info!(task_id = %task_id, "Investigation task cancelled");
        self.events.emit_task_cancelled(task_id);
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: &TaskId) -> Result<()> {
        let deleted = {
            let lock = self.task_lock(task_id)?;
            let _guard = lock.lock().await;
            self.delete_locked(task_id)
        };
        self.release_lock(task_id);
        deleted?;

        tracing::info!(task_id = %task_id, "Investigation task deleted");
        Ok(())
    }

    fn delete_locked(&self, task_id: &TaskId) -> Result<()> {
        let task = self
            .repository
            .find_by_id(task_id)?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        self.repository.delete(task_id)?;
        self.discard_checkpoint(&task);
        Ok(())
    }

    /// Spawn the workflow for a pending task.
    pub fn launch(self: &Arc<Self>, task_id: &TaskId) -> Result<()> {
        self.spawn(*task_id, false)
    }

    /// Continue a running task from its checkpoint.
    pub fn resume(self: &Arc<Self>, task_id: &TaskId) -> Result<()> {
        self.spawn(*task_id, true)
    }

    /// Whether a checkpoint exists for the task's workflow.
    pub fn has_checkpoint(&self, task: &InvestigationTask) -> Result<bool> {
        let key = self.workflow_for(task.task_type()).checkpoint_key(task.task_id());
        Ok(self.checkpoints.load(&key)?.is_some())
    }

    /// Fail a running task that cannot continue.
    pub async fn fail_task(&self, task_id: &TaskId, message: &str) -> Result<InvestigationTask> {
        let task = self.mutate(task_id, |t| t.fail(message)).await?;
        self.release_lock(task_id);
        self.discard_checkpoint(&task);
        self.events
            .emit_task_failed(task_id, message, FailureCode::TaskFailed);
        Ok(task)
    }

    /// Time out a running task.
    pub async fn time_out_task(&self, task_id: &TaskId, message: &str) -> Result<InvestigationTask> {
        let task = self.mutate(task_id, |t| t.time_out(message)).await?;
        self.release_lock(task_id);
        self.discard_checkpoint(&task);
        self.events
            .emit_task_failed(task_id, message, FailureCode::AnalysisTimeout);
        Ok(task)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn spawn(self: &Arc<Self>, task_id: TaskId, resume: bool) -> Result<()> {
        {
            let mut active = self
                .active
                .lock()
                .map_err(|_| Error::InvalidState("active task set poisoned".into()))?;
            if !active.insert(task_id) {
                return Err(Error::InvalidState(format!("任务 {} 已在执行中", task_id)));
            }
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.run(task_id, resume).await {
                tracing::error!(task_id = %task_id, error = %e, "Investigation task execution error");
            }
            service.release_lock(&task_id);
            if let Ok(mut active) = service.active.lock() {
                active.remove(&task_id);
            }
        });
        Ok(())
    }

    /// Drive one workflow run to a terminal task state.
    pub(crate) async fn run(self: &Arc<Self>, task_id: TaskId, resume: bool) -> Result<()> {
        let task = if resume {
            match self.repository.find_by_id(&task_id)? {
                Some(task) if task.status() == TaskStatus::Running => task,
                Some(task) => {
                    tracing::info!(task_id = %task_id, status = %task.status(), "Task not running, nothing to resume");
                    return Ok(());
                }
                None => return Err(Error::TaskNotFound(task_id.to_string())),
            }
        } else {
            let lock = self.task_lock(&task_id)?;
            let _guard = lock.lock().await;
            let mut task = self
                .repository
                .find_by_id(&task_id)?
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            if task.status() != TaskStatus::Pending {
                tracing::info!(task_id = %task_id, status = %task.status(), "Task no longer pending, skipping");
                return Ok(());
            }
            task.start()?;
            self.repository.save(&task)?;
            task
        };

        let workflow = self.workflow_for(task.task_type());
        let ctx = RunContext {
            task_id,
            progress: task.progress(),
            sink: Arc::new(TaskProgressSink {
                service: Arc::clone(self),
                task_id,
            }),
            probe: Arc::new(RepositoryStatusProbe {
                repository: Arc::clone(&self.repository),
            }),
        };

        tracing::info!(
            task_id = %task_id,
            workflow = workflow.name(),
            resume,
            "Investigation workflow started"
        );

        let outcome = tokio::time::timeout(self.settings.task_timeout, workflow.execute(task.query(), ctx)).await;

        match outcome {
            Ok(Ok(result)) => {
                let completed = self
                    .finish_running(&task_id, |t| t.complete(result.clone()))
                    .await?;
                if let Some(task) = completed {
                    tracing::info!(task_id = %task_id, duration = ?task.duration(), "Investigation task completed");
                    self.events.emit_task_completed(&task_id, &result);
                }
            }
            Ok(Err(e)) if e.is_cancelled() => {
                tracing::info!(task_id = %task_id, "Workflow stopped after cancellation");
                self.discard_checkpoint(&task);
            }
            Ok(Err(e)) if e.is_timeout() => {
                self.record_timeout(&task, &format!("{}: {}", TIMEOUT_MESSAGE, e)).await?;
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                let failed = self.finish_running(&task_id, |t| t.fail(&message)).await?;
                if failed.is_some() {
                    tracing::error!(task_id = %task_id, error = %message, "Investigation task failed");
                    self.discard_checkpoint(&task);
                    self.events.emit_task_failed(
                        &task_id,
                        &message,
                        FailureCode::TaskFailed,
                    );
                }
            }
            Err(_) => {
                let message = format!(
                    "{}：超过 {} 秒未完成",
                    TIMEOUT_MESSAGE,
                    self.settings.task_timeout.as_secs()
                );
                self.record_timeout(&task, &message).await?;
            }
        }
        Ok(())
    }

    async fn record_timeout(&self, task: &InvestigationTask, message: &str) -> Result<()> {
        let task_id = task.task_id();
        if self.finish_running(task_id, |t| t.time_out(message)).await?.is_some() {
            tracing::error!(task_id = %task_id, error = message, "Investigation task timed out");
            self.discard_checkpoint(task);
            self.events.emit_task_failed(
                task_id,
                message,
                FailureCode::AnalysisTimeout,
            );
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn workflow_for(&self, task_type: TaskType) -> &Arc<dyn Workflow> {
        match task_type {
            TaskType::IndustryResearch => &self.industry,
            TaskType::CredibilityVerification => &self.credibility,
        }
    }

    fn task_lock(&self, task_id: &TaskId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::InvalidState("task lock table poisoned".into()))?;
        Ok(Arc::clone(locks.entry(*task_id).or_default()))
    }

    /// Drop the task's lock entry once nobody holds or waits on it.
    fn release_lock(&self, task_id: &TaskId) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(task_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(task_id);
            }
        }
    }

    /// Load, transition and save a task under its lock.
    async fn mutate<F>(&self, task_id: &TaskId, transition: F) -> Result<InvestigationTask>
    where
        F: FnOnce(&mut InvestigationTask) -> Result<()>,
    {
        let lock = self.task_lock(task_id)?;
        let _guard = lock.lock().await;

        let mut task = self
            .repository
            .find_by_id(task_id)?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        transition(&mut task)?;
        self.repository.save(&task)?;
        Ok(task)
    }

    /// Apply a terminal transition only if the task is still running.
    async fn finish_running<F>(
        &self,
        task_id: &TaskId,
        transition: F,
    ) -> Result<Option<InvestigationTask>>
    where
        F: FnOnce(&mut InvestigationTask) -> Result<()>,
    {
        let lock = self.task_lock(task_id)?;
        let _guard = lock.lock().await;

        let Some(mut task) = self.repository.find_by_id(task_id)? else {
            tracing::warn!(task_id = %task_id, "Task deleted while its workflow was running");
            return Ok(None);
        };
        if task.status() != TaskStatus::Running {
            tracing::info!(task_id = %task_id, status = %task.status(), "Task left running state, dropping outcome");
            return Ok(None);
        }
        transition(&mut task)?;
        self.repository.save(&task)?;
        Ok(Some(task))
    }

    fn discard_checkpoint(&self, task: &InvestigationTask) {
        let key = self.workflow_for(task.task_type()).checkpoint_key(task.task_id());
        if let Err(e) = self.checkpoints.delete(&key) {
            tracing::warn!(key = %key, error = %e, "Failed to delete checkpoint");
        }
    }
}

/// Persists step history and pushes progress events.
struct TaskProgressSink {
    service: Arc<InvestigationTaskService>,
    task_id: TaskId,
}

#[async_trait]
impl ProgressSink for TaskProgressSink {
    async fn report(&self, progress: u8, step: AgentStep) {
        let recorded = self
            .service
            .mutate(&self.task_id, |t| t.update_progress(progress, step.clone()))
            .await;

        match recorded {
            Ok(_) => self
                .service
                .events
                .emit_task_progress(&self.task_id, progress, &step),
            Err(Error::InvalidState(reason)) => {
                tracing::debug!(task_id = %self.task_id, reason = %reason, "Progress dropped for non-running task");
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    progress,
                    agent = %step.agent_name,
                    error = %e,
                    "Failed to record progress"
                );
            }
        }
    }
}

/// Reads the task status straight from the repository.
struct RepositoryStatusProbe {
    repository: Arc<dyn TaskRepository>,
}

impl TaskStatusProbe for RepositoryStatusProbe {
    fn current_status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>> {
        Ok(self.repository.find_by_id(task_id)?.map(|t| t.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::sample_insight;
    use crate::domain::{AgentStepStatus, TaskResult};
    use crate::events::{BroadcastEmitter, TaskEvent, TASK_CANCELLED, TASK_COMPLETED, TASK_FAILED, TASK_PROGRESS};
    use crate::storage::{InMemoryCheckpointStore, InMemoryTaskRepository};
    use tokio::sync::{broadcast, Notify};

    /// Reports two steps, then waits until released.
    struct GatedWorkflow {
        gate: Arc<Notify>,
        outcome: fn() -> Result<TaskResult>,
    }

    #[async_trait]
    impl Workflow for GatedWorkflow {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn execute(&self, _query: &str, ctx: RunContext) -> Result<TaskResult> {
            ctx.sink
                .report(20, AgentStep::completed("行业背景速览", chrono::Utc::now(), "ok"))
                .await;
            self.gate.notified().await;
            if ctx.probe.current_status(&ctx.task_id)? != Some(TaskStatus::Running) {
                return Err(Error::Cancelled(ctx.task_id.to_string()));
            }
            ctx.sink
                .report(40, AgentStep::completed("市场热度分析", chrono::Utc::now(), "ok"))
                .await;
            (self.outcome)()
        }
    }

    struct Harness {
        service: Arc<InvestigationTaskService>,
        events: Arc<BroadcastEmitter>,
        gate: Arc<Notify>,
    }

    fn harness(outcome: fn() -> Result<TaskResult>, settings: ServiceSettings) -> Harness {
        let gate = Arc::new(Notify::new());
        let workflow: Arc<dyn Workflow> = Arc::new(GatedWorkflow {
            gate: gate.clone(),
            outcome,
        });
        let events = Arc::new(BroadcastEmitter::new(64));
        let service = Arc::new(InvestigationTaskService::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            events.clone(),
            workflow.clone(),
            workflow,
            settings,
        ));
        Harness { service, events, gate }
    }

    fn manual() -> ServiceSettings {
        ServiceSettings::default().with_auto_launch(false)
    }

    async fn next_event(rx: &mut broadcast::Receiver<TaskEvent>, name: &str) -> TaskEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("event in time")
                .expect("channel open");
            if event.event == name {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_create_persists_pending_task() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let id = h.service.create_industry_research_task(" 合成生物学 ").await.unwrap();

        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.query(), "合成生物学");
        assert!(!h.service.is_active(&id));

        assert!(h.service.create_industry_research_task("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_credibility_task_query_format() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let id = h
            .service
            .create_credibility_verification_task("600519.SH", " AI+白酒 ")
            .await
            .unwrap();
        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.query(), "600519.SH:AI+白酒");
        assert_eq!(task.task_type(), TaskType::CredibilityVerification);

        let generic = h
            .service
            .create_task("000001.SZ:数字货币", TaskType::CredibilityVerification)
            .await
            .unwrap();
        assert_eq!(h.service.get_task(&generic).unwrap().unwrap().query(), "000001.SZ:数字货币");

        assert!(matches!(
            h.service.create_credibility_verification_task("茅台", "AI").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            h.service.create_credibility_verification_task("600519.SH", " ").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_workflow_runs_to_completion() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let mut rx = h.events.subscribe();
        let id = h.service.create_industry_research_task("合成生物学").await.unwrap();

        h.service.launch(&id).unwrap();
        let first = next_event(&mut rx, TASK_PROGRESS).await;
        assert_eq!(first.payload["progress"], 20);
        assert!(h.service.is_active(&id));
        assert!(matches!(h.service.launch(&id), Err(Error::InvalidState(_))));

        h.gate.notify_one();
        let completed = next_event(&mut rx, TASK_COMPLETED).await;
        assert_eq!(completed.payload["result_type"], "industry_insight");

        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.progress(), 100);
        let names: Vec<_> = task.agent_steps().iter().map(|s| s.agent_name.as_str()).collect();
        assert_eq!(names, vec!["行业背景速览", "市场热度分析"]);
        assert!(task.agent_steps().iter().all(|s| s.status == AgentStepStatus::Completed));
    }

    #[tokio::test]
    async fn test_cancel_stops_running_workflow() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let mut rx = h.events.subscribe();
        let id = h.service.create_industry_research_task("储能").await.unwrap();
        h.service.launch(&id).unwrap();
        next_event(&mut rx, TASK_PROGRESS).await;

        let cancelled = h.service.cancel_task(&id).await.unwrap();
        assert_eq!(cancelled.status(), TaskStatus::Cancelled);
        next_event(&mut rx, TASK_CANCELLED).await;

        h.gate.notify_one();
        for _ in 0..100 {
            if !h.service.is_active(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert_eq!(task.progress(), 20);
        assert!(task.result().is_none());

        assert!(matches!(h.service.cancel_task(&id).await, Err(Error::InvalidState(_))));
        assert!(matches!(
            h.service.cancel_task(&TaskId::new()).await,
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_workflow_error_fails_task() {
        let h = harness(|| Err(Error::Service("deepseek 503".into())), manual());
        let mut rx = h.events.subscribe();
        let id = h.service.create_industry_research_task("储能").await.unwrap();
        h.service.launch(&id).unwrap();
        h.gate.notify_one();

        let failed = next_event(&mut rx, TASK_FAILED).await;
        assert_eq!(failed.payload["error_code"], "TASK_FAILED");

        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error_code(), Some(FailureCode::TaskFailed));
        assert!(task.error_message().unwrap().contains("deepseek 503"));
    }

    #[tokio::test]
    async fn test_timed_out_workflow_marks_analysis_timeout() {
        let settings = manual().with_task_timeout(Duration::from_millis(50));
        let h = harness(|| Ok(sample_insight().into()), settings);
        let mut rx = h.events.subscribe();
        let id = h.service.create_industry_research_task("储能").await.unwrap();
        h.service.launch(&id).unwrap();

        // Never released: the deadline fires first.
        let failed = next_event(&mut rx, TASK_FAILED).await;
        assert_eq!(failed.payload["error_code"], "ANALYSIS_TIMEOUT");

        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error_code(), Some(FailureCode::AnalysisTimeout));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let mut ids = Vec::new();
        for query in ["a", "b", "c"] {
            ids.push(h.service.create_industry_research_task(query).await.unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        h.service.cancel_task(&ids[0]).await.unwrap();

        assert_eq!(h.service.list_tasks(None, None, 0).unwrap().len(), 3);
        assert_eq!(h.service.list_tasks(None, Some(0), 0).unwrap().len(), 1);
        let pending = h.service.list_tasks(Some(TaskStatus::Pending), Some(10), 1).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id(), &ids[1]);
        assert_eq!(h.service.count_by_status(TaskStatus::Cancelled).unwrap(), 1);

        h.service.delete_task(&ids[0]).await.unwrap();
        assert!(h.service.get_task(&ids[0]).unwrap().is_none());
        assert!(matches!(
            h.service.delete_task(&ids[0]).await,
            Err(Error::TaskNotFound(_))
        ));
        assert_eq!(lock_entries(&h.service), 0);
    }

    fn lock_entries(service: &InvestigationTaskService) -> usize {
        service.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_runs() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let mut rx = h.events.subscribe();

        let done = h.service.create_industry_research_task("储能").await.unwrap();
        h.service.launch(&done).unwrap();
        next_event(&mut rx, TASK_PROGRESS).await;
        assert_eq!(lock_entries(&h.service), 1);
        h.gate.notify_one();
        next_event(&mut rx, TASK_COMPLETED).await;
        for _ in 0..100 {
            if !h.service.is_active(&done) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lock_entries(&h.service), 0);

        let cancelled = h.service.create_industry_research_task("光伏").await.unwrap();
        h.service.cancel_task(&cancelled).await.unwrap();
        assert_eq!(lock_entries(&h.service), 0);
    }

    #[tokio::test]
    async fn test_launch_skips_non_pending_task() {
        let h = harness(|| Ok(sample_insight().into()), manual());
        let id = h.service.create_industry_research_task("储能").await.unwrap();
        h.service.cancel_task(&id).await.unwrap();

        h.service.run(id, false).await.unwrap();
        let task = h.service.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task.agent_steps().is_empty());
    }
}
