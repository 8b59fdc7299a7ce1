//! DeepSeek chat completions client (OpenAI-compatible API).

use super::{ChatMessage, Completion, CompletionOptions, ReasoningClient, TokenUsage};
use async_trait::async_trait;
use intel_common::{Error, ReasoningConfig, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses worth another transport attempt.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// DeepSeek API client with transport-level retries.
pub struct DeepSeekClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl DeepSeekClient {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    async fn send_once(
        &self,
        api_key: &str,
        body: &DeepSeekRequest<'_>,
    ) -> std::result::Result<DeepSeekResponse, AttemptError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                error: Error::Service(format!("DeepSeek API 返回 {}: {}", status.as_u16(), text)),
                retryable: RETRYABLE_STATUSES.contains(&status.as_u16()),
            });
        }

        response.json::<DeepSeekResponse>().await.map_err(|e| {
            let mut attempt = self.transport_error(e);
            attempt.retryable = false;
            attempt
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> AttemptError {
        if e.is_timeout() {
            AttemptError {
                error: Error::Timeout(format!(
                    "DeepSeek 请求超过 {} 秒未响应",
                    self.timeout.as_secs_f64()
                )),
                retryable: false,
            }
        } else {
            AttemptError {
                retryable: e.is_connect() || e.is_request(),
                error: Error::Service(format!("DeepSeek 请求失败: {}", e)),
            }
        }
    }
}

/// Failure of one HTTP round trip.
struct AttemptError {
    error: Error,
    retryable: bool,
}

#[async_trait]
impl ReasoningClient for DeepSeekClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<Completion> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("DEEPSEEK_API_KEY 未配置".into()))?;

        let body = DeepSeekRequest {
            model: &self.model,
            messages: &messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut attempt = 0;
        let response = loop {
            match self.send_once(api_key, &body).await {
                Ok(response) => break response,
                Err(e) if e.retryable && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.error,
                        "DeepSeek call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.error),
            }
        };

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Service("DeepSeek 响应缺少 choices".into()))?;

        tracing::debug!(
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "DeepSeek completion received"
        );

        Ok(Completion {
            content,
            model: response.model,
            usage: response.usage,
        })
    }
}

// ============================================================================
// DeepSeek API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct DeepSeekRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct DeepSeekResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
