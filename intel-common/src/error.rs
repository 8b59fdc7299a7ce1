//! Error types for the investment intelligence services.

use thiserror::Error;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for investigation tasks and their collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller input was rejected (empty query, malformed id, bad stock code)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal task state transition
    #[error("Invalid task state: {0}")]
    InvalidState(String),

    /// Task does not exist
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// External reasoning or data service call failed
    #[error("Service error: {0}")]
    Service(String),

    /// External call exceeded its time bound
    #[error("Analysis timed out: {0}")]
    Timeout(String),

    /// The workflow observed that its task was cancelled
    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// Repository or checkpoint store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether an agent step may retry after this error.
    ///
    /// Only failures of external calls are transient. Input, state and
    /// storage problems are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::Service(_) | Self::Timeout(_))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    /// Check if this is a cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.root() {
            Self::Validation(_) => 400,
            Self::TaskNotFound(_) => 404,
            Self::InvalidState(_) => 409,
            Self::Service(_) => 502,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Stable machine-readable code reported to API clients.
    pub fn error_code(&self) -> &'static str {
        match self.root() {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidState(_) => "INVALID_TASK_STATE",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::Service(_) => "LLM_SERVICE_ERROR",
            Self::Timeout(_) => "ANALYSIS_TIMEOUT",
            Self::Cancelled(_) => "TASK_CANCELLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::Validation("test".into()).status_code(), 400);
        assert_eq!(Error::TaskNotFound("test".into()).status_code(), 404);
        assert_eq!(Error::InvalidState("test".into()).status_code(), 409);
        assert_eq!(Error::Service("test".into()).status_code(), 502);
        assert_eq!(Error::Timeout("test".into()).status_code(), 504);
        assert_eq!(Error::Storage("test".into()).status_code(), 500);
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::Timeout("deepseek".into());
        let with_ctx = err.with_context("market heat step");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert_eq!(with_ctx.status_code(), 504);
        assert_eq!(with_ctx.error_code(), "ANALYSIS_TIMEOUT");
        assert!(with_ctx.is_timeout());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::Service("500".into()).is_retryable());
        assert!(Error::Timeout("60s".into()).is_retryable());
        assert!(!Error::Validation("empty".into()).is_retryable());
        assert!(!Error::InvalidState("done".into()).is_retryable());
        assert!(!Error::Cancelled("id".into()).is_retryable());
    }

    #[test]
    fn test_result_ext_context() {
        let parsed: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{not json");
        let err = parsed.context("decoding checkpoint").unwrap_err();
        assert!(err.to_string().starts_with("decoding checkpoint"));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
