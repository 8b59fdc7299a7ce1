//! Task recovery after service restart.
//!
//! A restart kills every in-flight workflow. On startup, running tasks with
//! a checkpoint are resumed, running tasks without one are failed, and
//! pending tasks are launched.

use chrono::Utc;
use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{InvestigationTask, TaskStatus};
use crate::service::InvestigationTaskService;

/// Failure message for tasks that cannot be resumed.
pub const INTERRUPTED_MESSAGE: &str = "服务重启导致任务中断";

/// What recovery did with a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Running task continued from its checkpoint
    Resumed,
    /// Pending task launched
    Relaunched,
    /// Running task without a checkpoint, marked failed
    Failed,
    /// Recovery could not act on the task
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryDetail {
    pub task_id: String,
    pub action: RecoveryAction,
    pub error: Option<String>,
}

/// Result of a recovery pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub resumed: usize,
    pub relaunched: usize,
    pub failed: usize,
    pub details: Vec<RecoveryDetail>,
}

impl RecoveryReport {
    fn record(&mut self, detail: RecoveryDetail) {
        match detail.action {
            RecoveryAction::Resumed => self.resumed += 1,
            RecoveryAction::Relaunched => self.relaunched += 1,
            RecoveryAction::Failed => self.failed += 1,
            RecoveryAction::Skipped => {}
        }
        self.details.push(detail);
    }
}

pub struct RecoveryManager {
    service: Arc<InvestigationTaskService>,
}

impl RecoveryManager {
    pub fn new(service: Arc<InvestigationTaskService>) -> Self {
        Self { service }
    }

    /// Recover every interrupted task.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let running = self.service.all_in_status(TaskStatus::Running)?;
        if !running.is_empty() {
            info!(count = running.len(), "Found running tasks interrupted by restart");
        }
        for task in running {
            let detail = self.recover_running(&task).await;
            report.record(detail);
        }

        for task in self.service.all_in_status(TaskStatus::Pending)? {
            let detail = match self.service.launch(task.task_id()) {
                Ok(()) => detail(&task, RecoveryAction::Relaunched, None),
                Err(e) => {
                    warn!(task_id = %task.task_id(), error = %e, "Failed to launch pending task");
                    detail(&task, RecoveryAction::Skipped, Some(e.to_string()))
                }
            };
            report.record(detail);
        }

        info!(
            resumed = report.resumed,
            relaunched = report.relaunched,
            failed = report.failed,
            "Recovery complete"
        );
        Ok(report)
    }

    async fn recover_running(&self, task: &InvestigationTask) -> RecoveryDetail {
        let task_id = task.task_id();

        let has_checkpoint = match self.service.has_checkpoint(task) {
            Ok(found) => found,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Checkpoint lookup failed, treating as missing");
                false
            }
        };

        if has_checkpoint {
            return match self.service.resume(task_id) {
                Ok(()) => {
                    info!(task_id = %task_id, progress = task.progress(), "Resuming task from checkpoint");
                    detail(task, RecoveryAction::Resumed, None)
                }
                Err(e) => detail(task, RecoveryAction::Skipped, Some(e.to_string())),
            };
        }

        match self.service.fail_task(task_id, INTERRUPTED_MESSAGE).await {
            Ok(_) => {
                warn!(task_id = %task_id, "Task marked as failed after restart");
                detail(task, RecoveryAction::Failed, None)
            }
            Err(e) => detail(task, RecoveryAction::Skipped, Some(e.to_string())),
        }
    }

    /// Time out running tasks with no update for longer than `max_age`.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::Config(format!("invalid stale task age: {}", e)))?;
        let stale = self.service.find_stale_running(Utc::now() - max_age)?;

        let mut swept = 0;
        for task in stale {
            // A workflow executing in this process is bounded by the task deadline.
            if self.service.is_active(task.task_id()) {
                continue;
            }
            let message = format!("任务超过 {} 秒无进展", max_age.num_seconds());
            match self.service.time_out_task(task.task_id(), &message).await {
                Ok(_) => swept += 1,
                Err(e) => warn!(task_id = %task.task_id(), error = %e, "Failed to time out stale task"),
            }
        }

        if swept > 0 {
            info!(swept, "Stale running tasks timed out");
        }
        Ok(swept)
    }
}

fn detail(task: &InvestigationTask, action: RecoveryAction, error: Option<String>) -> RecoveryDetail {
    RecoveryDetail {
        task_id: task.task_id().to_string(),
        action,
        error,
    }
}
