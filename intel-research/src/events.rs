//! Task event emission.
//!
//! Emitters are fire-and-forget: transport problems are logged and dropped so
//! that a push channel can never fail a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;

use crate::domain::{AgentStep, FailureCode, TaskId, TaskResult};

/// Namespace under which task events are pushed.
pub const NAMESPACE: &str = "/intelligence";

pub const TASK_PROGRESS: &str = "task_progress";
pub const TASK_COMPLETED: &str = "task_completed";
pub const TASK_FAILED: &str = "task_failed";
pub const TASK_CANCELLED: &str = "task_cancelled";

/// Outbound event sink.
pub trait EventEmitter: Send + Sync {
    /// Publish one event. Must not panic and never reports failure.
    fn emit(&self, event: &str, payload: serde_json::Value);

    fn emit_task_progress(&self, task_id: &TaskId, progress: u8, agent_step: &AgentStep) {
        self.emit(
            TASK_PROGRESS,
            json!({
                "task_id": task_id.to_string(),
                "progress": progress,
                "agent_step": agent_step,
            }),
        );
    }

    fn emit_task_completed(&self, task_id: &TaskId, result: &TaskResult) {
        let payload = match result.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to encode task result for event");
                serde_json::Value::Null
            }
        };
        self.emit(
            TASK_COMPLETED,
            json!({
                "task_id": task_id.to_string(),
                "result_type": result.result_type(),
                "result": payload,
            }),
        );
    }

    fn emit_task_failed(&self, task_id: &TaskId, error: &str, error_code: FailureCode) {
        self.emit(
            TASK_FAILED,
            json!({
                "task_id": task_id.to_string(),
                "error": error,
                "error_code": error_code.as_str(),
            }),
        );
    }

    fn emit_task_cancelled(&self, task_id: &TaskId) {
        self.emit(TASK_CANCELLED, json!({ "task_id": task_id.to_string() }));
    }
}

/// Emitter that discards everything.
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: &str, _payload: serde_json::Value) {}
}

/// Emitter that writes events to the log.
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        tracing::info!(namespace = NAMESPACE, event, payload = %payload, "Task event");
    }
}

/// Event as delivered to push subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event: String,
    pub payload: serde_json::Value,
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out emitter over a tokio broadcast channel.
pub struct BroadcastEmitter {
    sender: broadcast::Sender<TaskEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        let message = TaskEvent {
            event: event.to_string(),
            payload,
            namespace: NAMESPACE.to_string(),
            timestamp: Utc::now(),
        };
        // No subscribers is not an error.
        if self.sender.send(message).is_err() {
            tracing::trace!(event, "No event subscribers");
        }
    }
}
