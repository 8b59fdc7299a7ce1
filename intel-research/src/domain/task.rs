//! InvestigationTask aggregate root and its state machine.
//!
//! ```text
//!            start()              complete(result)
//!  pending ──────────▶ running ─────────────────▶ completed
//!     │                   │  fail(msg) / time_out(msg)
//!     │                   ├──────────────────────▶ failed
//!     │     cancel()      │  cancel()
//!     └───────────────────┴──────────────────────▶ cancelled
//! ```
//!
//! Terminal states reject every transition. `result` is present iff the task
//! is completed, `error_message`/`error_code` iff it failed, and
//! `completed_at` iff it is terminal.

use chrono::{DateTime, Utc};
use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::result::TaskResult;
use super::step::AgentStep;
use super::values::TaskId;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    IndustryResearch,
    CredibilityVerification,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndustryResearch => "industry_research",
            Self::CredibilityVerification => "credibility_verification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "industry_research" => Some(Self::IndustryResearch),
            "credibility_verification" => Some(Self::CredibilityVerification),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Generic failure
    TaskFailed,
    /// The analysis exceeded its time bound
    AnalysisTimeout,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskFailed => "TASK_FAILED",
            Self::AnalysisTimeout => "ANALYSIS_TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TASK_FAILED" => Some(Self::TaskFailed),
            "ANALYSIS_TIMEOUT" => Some(Self::AnalysisTimeout),
            _ => None,
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// An industry research or credibility verification task.
#[derive(Debug, Clone, PartialEq)]
pub struct InvestigationTask {
    task_id: TaskId,
    task_type: TaskType,
    query: String,
    status: TaskStatus,
    progress: u8,
    agent_steps: Vec<AgentStep>,
    result: Option<TaskResult>,
    error_message: Option<String>,
    error_code: Option<FailureCode>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl InvestigationTask {
    /// Create a pending task with a fresh id.
    pub fn new(task_type: TaskType, query: &str) -> Result<Self> {
        Self::with_id(TaskId::new(), task_type, query)
    }

    /// Create a pending task with a caller-assigned id.
    pub fn with_id(task_id: TaskId, task_type: TaskType, query: &str) -> Result<Self> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("查询文本不能为空".into()));
        }

        let now = Utc::now();
        Ok(Self {
            task_id,
            task_type,
            query: query.to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            agent_steps: Vec::new(),
            result: None,
            error_message: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    pub fn start(&mut self) -> Result<()> {
        self.require(TaskStatus::Pending, "启动")?;
        self.status = TaskStatus::Running;
        self.touch();
        Ok(())
    }

    /// Append a step and advance progress.
    ///
    /// Progress never moves backwards: a value below the current progress or
    /// above 100 is rejected and the task is left unchanged.
    pub fn update_progress(&mut self, progress: u8, agent_step: AgentStep) -> Result<()> {
        self.require(TaskStatus::Running, "更新进度")?;
        if progress > 100 {
            return Err(Error::Validation(format!(
                "进度必须在 0-100 之间，当前值: {}",
                progress
            )));
        }
        if progress < self.progress {
            return Err(Error::Validation(format!(
                "进度不能回退: {} -> {}",
                self.progress, progress
            )));
        }

        self.progress = progress;
        self.agent_steps.push(agent_step);
        self.touch();
        Ok(())
    }

    pub fn complete(&mut self, result: TaskResult) -> Result<()> {
        self.require(TaskStatus::Running, "完成")?;
        result.validate()?;

        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.finish();
        Ok(())
    }

    pub fn fail(&mut self, error_message: &str) -> Result<()> {
        self.fail_with(FailureCode::TaskFailed, error_message)
    }

    /// Fail with the dedicated timeout code.
    pub fn time_out(&mut self, error_message: &str) -> Result<()> {
        self.fail_with(FailureCode::AnalysisTimeout, error_message)
    }

    fn fail_with(&mut self, code: FailureCode, error_message: &str) -> Result<()> {
        self.require(TaskStatus::Running, "标记失败")?;
        let message = error_message.trim();
        if message.is_empty() {
            return Err(Error::Validation("错误信息不能为空".into()));
        }

        self.status = TaskStatus::Failed;
        self.error_message = Some(message.to_string());
        self.error_code = Some(code);
        self.finish();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Running) {
            return Err(self.invalid_transition("取消"));
        }
        self.status = TaskStatus::Cancelled;
        self.finish();
        Ok(())
    }

    fn require(&self, expected: TaskStatus, action: &str) -> Result<()> {
        if self.status != expected {
            return Err(self.invalid_transition(action));
        }
        Ok(())
    }

    fn invalid_transition(&self, action: &str) -> Error {
        Error::InvalidState(format!(
            "任务 {} 当前状态为 {}，无法{}",
            self.task_id, self.status, action
        ))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn agent_steps(&self) -> &[AgentStep] {
        &self.agent_steps
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_code(&self) -> Option<FailureCode> {
        self.error_code
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds from creation to the terminal transition.
    pub fn duration(&self) -> Option<f64> {
        if !self.is_terminal() {
            return None;
        }
        self.completed_at
            .map(|end| (end - self.created_at).num_milliseconds() as f64 / 1000.0)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn to_record(&self) -> Result<TaskRecord> {
        let (result_type, result) = match &self.result {
            Some(r) => (Some(r.result_type().to_string()), Some(r.to_payload()?)),
            None => (None, None),
        };

        Ok(TaskRecord {
            task_id: self.task_id,
            task_type: self.task_type,
            query: self.query.clone(),
            status: self.status,
            progress: self.progress,
            agent_steps: self.agent_steps.clone(),
            result_type,
            result,
            error_message: self.error_message.clone(),
            error_code: self.error_code,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }

    /// Rebuild a task from storage, rejecting records that break invariants.
    pub fn rehydrate(record: TaskRecord) -> Result<Self> {
        let id = record.task_id;
        let corrupt = |what: &str| Error::Storage(format!("任务 {} 的存储记录无效: {}", id, what));

        if record.query.trim().is_empty() {
            return Err(corrupt("query 为空"));
        }
        if record.progress > 100 {
            return Err(corrupt("progress 超出范围"));
        }

        let result = match (record.result_type.as_deref(), record.result) {
            (Some(kind), Some(payload)) => Some(TaskResult::from_parts(kind, payload)?),
            (None, None) => None,
            _ => return Err(corrupt("result_type 与 result 不一致")),
        };

        let completed = record.status == TaskStatus::Completed;
        let failed = record.status == TaskStatus::Failed;
        if result.is_some() != completed {
            return Err(corrupt("result 与状态不一致"));
        }
        if record.error_message.is_some() != failed || record.error_code.is_some() != failed {
            return Err(corrupt("error_message 与状态不一致"));
        }
        if record.completed_at.is_some() != record.status.is_terminal() {
            return Err(corrupt("completed_at 与状态不一致"));
        }

        Ok(Self {
            task_id: record.task_id,
            task_type: record.task_type,
            query: record.query,
            status: record.status,
            progress: record.progress,
            agent_steps: record.agent_steps,
            result,
            error_message: record.error_message,
            error_code: record.error_code,
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        })
    }
}

/// Flat, serializable form of a task.
///
/// The result is stored as a discriminator plus an untyped payload so that
/// either result variant fits in the same column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub query: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub agent_steps: Vec<AgentStep>,
    pub result_type: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<FailureCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Tests
// ============================================================================
