//! Intel Common - shared configuration, errors, and logging for the
//! investment intelligence services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - The unified error taxonomy used by tasks, workflows, and adapters
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AgentRetryConfig, Config, ObservabilityConfig, ProvidersConfig, ReasoningConfig,
    ServerConfig, StorageConfig, TasksConfig,
};
pub use error::{Error, Result, ResultExt};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
}
