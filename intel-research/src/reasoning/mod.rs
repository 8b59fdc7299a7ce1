//! Reasoning (LLM) client abstraction.
//!
//! Workflows only see the [`ReasoningClient`] trait. The production
//! implementation is [`DeepSeekClient`]; tests script their own.

mod deepseek;

pub use deepseek::DeepSeekClient;

use async_trait::async_trait;
use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Temperature used by every analysis step.
pub const ANALYSIS_TEMPERATURE: f32 = 0.3;

/// System prompt shared by the analysis steps.
pub const JSON_SYSTEM_PROMPT: &str =
    "你是一名专业的A股投资研究分析师。请严格按照要求的 JSON 格式输出，不要输出任何额外文字。";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl CompletionOptions {
    /// Low-temperature options for structured analysis.
    pub fn analysis() -> Self {
        Self {
            temperature: ANALYSIS_TEMPERATURE,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

// ============================================================================
// Trait
// ============================================================================

/// Single-call completion interface.
///
/// Implementations report transport and API failures as `Error::Service`
/// and exceeded deadlines as `Error::Timeout`.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<Completion>;
}

/// Ask for a JSON answer with the shared analysis settings.
pub async fn complete_json(client: &dyn ReasoningClient, prompt: &str) -> Result<serde_json::Value> {
    let messages = vec![ChatMessage::system(JSON_SYSTEM_PROMPT), ChatMessage::user(prompt)];
    let completion = client.complete(messages, CompletionOptions::analysis()).await?;
    extract_json(&completion.content)
}

/// Pull a JSON value out of a model reply.
///
/// Handles ```` ```json ```` and bare ```` ``` ```` fences, then falls back to
/// the span between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();

    let candidate = if let Some(start) = trimmed.find("```json") {
        fenced_body(&trimmed[start + "```json".len()..])
    } else if let Some(start) = trimmed.find("```") {
        fenced_body(&trimmed[start + 3..])
    } else {
        trimmed
    };

    if let Ok(value) = serde_json::from_str(candidate.trim()) {
        return Ok(value);
    }

    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str(&trimmed[open..=close]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(Error::Service(format!("无法解析模型返回的 JSON: {}", preview)))
}

fn fenced_body(rest: &str) -> &str {
    match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    }
}
