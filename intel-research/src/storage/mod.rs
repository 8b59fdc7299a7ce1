//! Task and checkpoint persistence.
//!
//! Both stores are synchronous: every operation is a short local call, and
//! the service serializes writes per task before reaching them.

mod memory;
mod sqlite;

pub use memory::{InMemoryCheckpointStore, InMemoryTaskRepository};
pub use sqlite::{SqliteCheckpointStore, SqliteTaskRepository};

use chrono::{DateTime, Utc};
use intel_common::Result;

use crate::domain::{InvestigationTask, TaskId, TaskStatus};

/// Repository for investigation tasks.
pub trait TaskRepository: Send + Sync {
    /// Insert or replace the task.
    fn save(&self, task: &InvestigationTask) -> Result<()>;

    fn find_by_id(&self, id: &TaskId) -> Result<Option<InvestigationTask>>;

    /// Tasks in `status`, newest first.
    fn find_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<InvestigationTask>>;

    /// All tasks, newest first.
    fn find_recent(&self, limit: usize, offset: usize) -> Result<Vec<InvestigationTask>>;

    /// Returns whether a task was removed.
    fn delete(&self, id: &TaskId) -> Result<bool>;

    fn count_by_status(&self, status: TaskStatus) -> Result<usize>;

    /// Running tasks whose last update is older than `older_than`.
    fn find_stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<InvestigationTask>> {
        Ok(self
            .find_by_status(TaskStatus::Running, usize::MAX)?
            .into_iter()
            .filter(|t| t.updated_at() < older_than)
            .collect())
    }
}

/// Keyed store for intermediate workflow state.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, key: &str, state: &serde_json::Value) -> Result<()>;

    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    fn delete(&self, key: &str) -> Result<()>;
}
