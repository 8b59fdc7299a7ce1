//! Configuration management for the investigation services.
//!
//! The service reads a single JSON file at `~/.intel-research/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (INTEL_*, DEEPSEEK_*, LIXIN_TOKEN)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `INTEL_HOST` → server.host
//! - `INTEL_PORT` → server.port
//! - `INTEL_LOG_LEVEL` → observability.log_level
//! - `INTEL_LOG_FORMAT` → observability.log_format
//! - `INTEL_DATABASE_PATH` → storage.database_path
//! - `INTEL_NEWS_ENDPOINT` → providers.news_endpoint
//! - `DEEPSEEK_API_KEY` → reasoning.api_key
//! - `DEEPSEEK_BASE_URL` → reasoning.base_url
//! - `DEEPSEEK_MODEL` → reasoning.model
//! - `DEEPSEEK_TIMEOUT` → reasoning.timeout_secs
//! - `DEEPSEEK_MAX_RETRIES` → reasoning.max_retries
//! - `LIXIN_TOKEN` → providers.lixin_token

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".intel-research"),
        |dirs| dirs.home_dir().join(".intel-research"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Server
// ============================================================================

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4480
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Reasoning (LLM) Client
// ============================================================================

/// Settings for the OpenAI-compatible reasoning endpoint.
///
/// Transport retries here cover HTTP-level hiccups (429, 5xx). Agent-level
/// retries are configured separately in [`AgentRetryConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_reasoning_model")]
    pub model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_reasoning_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_reasoning_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_reasoning_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: default_reasoning_base_url(),
            api_key: None,
            model: default_reasoning_model(),
            timeout_secs: default_reasoning_timeout(),
            max_retries: default_reasoning_max_retries(),
            retry_base_delay_ms: default_reasoning_base_delay_ms(),
            retry_max_delay_ms: default_reasoning_max_delay_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_reasoning_base_url() -> String {
    "https://api.deepseek.com/v1".into()
}

fn default_reasoning_model() -> String {
    "deepseek-chat".into()
}

fn default_reasoning_timeout() -> u64 {
    60
}

fn default_reasoning_max_retries() -> u32 {
    3
}

fn default_reasoning_base_delay_ms() -> u64 {
    1000
}

fn default_reasoning_max_delay_ms() -> u64 {
    30_000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

// ============================================================================
// Agent Retry
// ============================================================================

/// Retry policy applied to each workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRetryConfig {
    /// Total attempts per step, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_agent_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_agent_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomize delays to spread out concurrent retries
    #[serde(default)]
    pub jitter: bool,
}

impl Default for AgentRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_agent_base_delay_ms(),
            max_delay_ms: default_agent_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_agent_base_delay_ms() -> u64 {
    1000
}

fn default_agent_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// ============================================================================
// Storage
// ============================================================================

/// SQLite storage location for tasks and workflow checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    config_dir().join("intel.db")
}

// ============================================================================
// Data Providers
// ============================================================================

/// News and announcement sources. Both are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// JSON news search endpoint; news is skipped when unset
    #[serde(default)]
    pub news_endpoint: Option<String>,

    #[serde(default = "default_news_days")]
    pub news_days: u32,

    /// Lixinger token for company announcements
    #[serde(default)]
    pub lixin_token: Option<String>,

    #[serde(default = "default_announcement_days")]
    pub announcement_days: u32,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            news_endpoint: None,
            news_days: default_news_days(),
            lixin_token: None,
            announcement_days: default_announcement_days(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_news_days() -> u32 {
    7
}

fn default_announcement_days() -> u32 {
    30
}

fn default_provider_timeout() -> u64 {
    15
}

// ============================================================================
// Tasks
// ============================================================================

/// Task listing and execution bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,

    #[serde(default = "default_max_list_limit")]
    pub max_list_limit: usize,

    /// Upper bound on a single workflow run before it is timed out
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            default_list_limit: default_list_limit(),
            max_list_limit: default_max_list_limit(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

fn default_list_limit() -> usize {
    20
}

fn default_max_list_limit() -> usize {
    100
}

fn default_task_timeout() -> u64 {
    600
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub reasoning: ReasoningConfig,

    #[serde(default)]
    pub agent_retry: AgentRetryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Config {
    /// Load configuration from the default path, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::info!("Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("INTEL_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("INTEL_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(level) = std::env::var("INTEL_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("INTEL_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(path) = std::env::var("INTEL_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }

        if let Ok(endpoint) = std::env::var("INTEL_NEWS_ENDPOINT") {
            self.providers.news_endpoint = Some(endpoint);
        }
        if let Ok(token) = std::env::var("LIXIN_TOKEN") {
            self.providers.lixin_token = Some(token);
        }

        self.apply_reasoning_env_overrides();
    }

    fn apply_reasoning_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            self.reasoning.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("DEEPSEEK_BASE_URL") {
            self.reasoning.base_url = url;
        }
        if let Ok(model) = std::env::var("DEEPSEEK_MODEL") {
            self.reasoning.model = model;
        }
        if let Ok(timeout) = std::env::var("DEEPSEEK_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                self.reasoning.timeout_secs = t;
            }
        }
        if let Ok(retries) = std::env::var("DEEPSEEK_MAX_RETRIES") {
            if let Ok(r) = retries.parse() {
                self.reasoning.max_retries = r;
            }
        }
    }

    /// Address the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 4480);
        assert_eq!(config.reasoning.model, "deepseek-chat");
        assert_eq!(config.reasoning.timeout_secs, 60);
        assert_eq!(config.agent_retry.max_attempts, 3);
        assert!((config.agent_retry.backoff_multiplier - 2.0).abs() < 0.001);
        assert!(!config.agent_retry.jitter);
        assert_eq!(config.tasks.default_list_limit, 20);
        assert!(config.providers.news_endpoint.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"server": {"port": 9000}, "agent_retry": {"max_attempts": 5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.agent_retry.max_attempts, 5);
        assert_eq!(config.agent_retry.max_delay_ms, 10_000);
    }

    #[test]
    fn test_observability_aliases() {
        let json = r#"{"observability": {"level": "debug", "format": "json"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"reasoning": {{"model": "deepseek-reasoner"}}}}"#).unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.reasoning.model, "deepseek-reasoner");
        assert_eq!(config.reasoning.base_url, "https://api.deepseek.com/v1");
    }

    #[test]
    fn test_load_from_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("DEEPSEEK_MAX_RETRIES", "7");
        std::env::set_var("INTEL_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.reasoning.max_retries, 7);
        assert_eq!(config.server.port, 4480);

        std::env::remove_var("DEEPSEEK_MAX_RETRIES");
        std::env::remove_var("INTEL_PORT");
    }

    #[test]
    fn test_bind_address() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "127.0.0.1:4480");
    }
}
