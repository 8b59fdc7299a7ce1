//! In-memory stores for tests and ephemeral deployments.

use intel_common::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{CheckpointStore, TaskRepository};
use crate::domain::{InvestigationTask, TaskId, TaskStatus};

fn poisoned() -> Error {
    Error::Storage("in-memory store lock poisoned".into())
}

/// Newest first, ties broken by id for a stable order.
fn sort_recent(tasks: &mut [InvestigationTask]) {
    tasks.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.task_id().to_string().cmp(&a.task_id().to_string()))
    });
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, InvestigationTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn save(&self, task: &InvestigationTask) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        tasks.insert(*task.task_id(), task.clone());
        Ok(())
    }

    fn find_by_id(&self, id: &TaskId) -> Result<Option<InvestigationTask>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        Ok(tasks.get(id).cloned())
    }

    fn find_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<InvestigationTask>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        let mut matching: Vec<_> = tasks
            .values()
            .filter(|t| t.status() == status)
            .cloned()
            .collect();
        sort_recent(&mut matching);
        matching.truncate(limit);
        Ok(matching)
    }

    fn find_recent(&self, limit: usize, offset: usize) -> Result<Vec<InvestigationTask>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = tasks.values().cloned().collect();
        sort_recent(&mut all);
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    fn delete(&self, id: &TaskId) -> Result<bool> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        Ok(tasks.remove(id).is_some())
    }

    fn count_by_status(&self, status: TaskStatus) -> Result<usize> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        Ok(tasks.values().filter(|t| t.status() == status).count())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, key: &str, state: &serde_json::Value) -> Result<()> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        states.insert(key.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let states = self.states.read().map_err(|_| poisoned())?;
        Ok(states.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        states.remove(key);
        Ok(())
    }
}
