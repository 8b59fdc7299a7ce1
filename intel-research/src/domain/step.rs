//! Execution record of a single workflow step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an agent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Step output was restored from a checkpoint instead of re-running
    Skipped,
}

impl AgentStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AgentStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one agent step in one state.
///
/// A new value represents each state change; steps are never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub agent_name: String,
    pub status: AgentStepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_summary: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl AgentStep {
    pub fn new(agent_name: impl Into<String>, status: AgentStepStatus) -> Self {
        Self {
            agent_name: agent_name.into(),
            status,
            started_at: None,
            completed_at: None,
            output_summary: None,
            error_message: None,
        }
    }

    /// A step that finished successfully.
    pub fn completed(
        agent_name: impl Into<String>,
        started_at: DateTime<Utc>,
        output_summary: impl Into<String>,
    ) -> Self {
        Self {
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            output_summary: Some(output_summary.into()),
            ..Self::new(agent_name, AgentStepStatus::Completed)
        }
    }

    /// A step whose retries are exhausted.
    pub fn failed(
        agent_name: impl Into<String>,
        started_at: DateTime<Utc>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            error_message: Some(error_message.into()),
            ..Self::new(agent_name, AgentStepStatus::Failed)
        }
    }

    /// One failed attempt that will be retried.
    pub fn attempt_failed(
        agent_name: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        error_message: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            started_at: Some(now),
            completed_at: Some(now),
            error_message: Some(format!(
                "第 {}/{} 次尝试失败: {}",
                attempt, max_attempts, error_message
            )),
            ..Self::new(agent_name, AgentStepStatus::Failed)
        }
    }

    /// A step restored from a checkpoint.
    pub fn skipped(agent_name: impl Into<String>) -> Self {
        Self {
            output_summary: Some("已从检查点恢复".to_string()),
            ..Self::new(agent_name, AgentStepStatus::Skipped)
        }
    }

    /// Seconds between start and completion, when both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
