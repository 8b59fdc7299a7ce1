//! Scripted collaborators for workflow tests.

use async_trait::async_trait;
use intel_common::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{ProgressSink, RunContext, TaskStatusProbe, WorkflowDeps};
use crate::domain::{AgentStep, TaskId, TaskStatus};
use crate::providers::{NullAnnouncementProvider, NullNewsProvider};
use crate::reasoning::{ChatMessage, Completion, CompletionOptions, ReasoningClient, TokenUsage};
use crate::retry::RetryPolicy;
use crate::storage::InMemoryCheckpointStore;

/// Replies chosen by the first keyword found in the user prompt.
pub struct ScriptedReasoning {
    script: Vec<(&'static str, Option<String>)>,
    pub calls: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(mut self, keyword: &'static str, body: serde_json::Value) -> Self {
        self.script.push((keyword, Some(body.to_string())));
        self
    }

    /// Every prompt containing `keyword` fails with a service error.
    pub fn fail(mut self, keyword: &'static str) -> Self {
        self.script.push((keyword, None));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());

        match self.script.iter().find(|(k, _)| prompt.contains(k)) {
            Some((_, Some(body))) => Ok(Completion {
                content: format!("```json\n{}\n```", body),
                model: "scripted".into(),
                usage: TokenUsage::default(),
            }),
            Some((keyword, None)) => Err(Error::Service(format!("scripted failure for {}", keyword))),
            None => Err(Error::Service("no scripted reply".into())),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub reports: Mutex<Vec<(u8, AgentStep)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(u8, AgentStep)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn report(&self, progress: u8, step: AgentStep) {
        self.reports.lock().unwrap().push((progress, step));
    }
}

pub struct AlwaysRunning;

impl TaskStatusProbe for AlwaysRunning {
    fn current_status(&self, _task_id: &TaskId) -> Result<Option<TaskStatus>> {
        Ok(Some(TaskStatus::Running))
    }
}

pub fn deps(reasoning: Arc<ScriptedReasoning>) -> (WorkflowDeps, Arc<InMemoryCheckpointStore>) {
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let deps = WorkflowDeps {
        reasoning,
        news: Arc::new(NullNewsProvider),
        announcements: Arc::new(NullAnnouncementProvider),
        checkpoints: checkpoints.clone(),
        retry: RetryPolicy::immediate(2),
        news_days: 7,
        announcement_days: 30,
    };
    (deps, checkpoints)
}

pub fn context(sink: Arc<RecordingSink>) -> RunContext {
    RunContext {
        task_id: TaskId::new(),
        progress: 0,
        sink,
        probe: Arc::new(AlwaysRunning),
    }
}
