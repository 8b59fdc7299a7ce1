//! Intel Research Library
//!
//! Investigation task engine for A-share investment intelligence: LLM-driven
//! industry research and concept credibility verification, run as
//! background multi-step workflows with persisted progress.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   intel-research (Rust Service)                     │
//! │                           :4480                                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  HTTP routes    │─▶│  Task service   │─▶│  Workflows      │      │
//! │  └─────────────────┘  └────────┬────────┘  └────────┬────────┘      │
//! │                                │                    │               │
//! │  ┌─────────────────┐  ┌────────▼────────┐  ┌────────▼────────┐      │
//! │  │  Event stream   │◀─│  SQLite store   │  │ DeepSeek / data │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Investigation task
//! - Lifecycle: pending → running → completed | failed | cancelled
//! - Progress only moves forward; every agent attempt is recorded
//!
//! ## Agent steps
//! - Each step is retried with exponential backoff
//! - An exhausted step degrades to a neutral fallback instead of failing the task
//! - Completed steps are checkpointed so a restart can resume

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod domain;
pub mod events;
pub mod providers;
pub mod reasoning;
pub mod recovery;
pub mod retry;
pub mod routes;
pub mod service;
pub mod storage;
pub mod workflow;

use anyhow::Result;
use intel_common::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::events::BroadcastEmitter;
use crate::providers::{
    AnnouncementDataProvider, HttpNewsProvider, LixinAnnouncementProvider, NewsDataProvider,
    NullAnnouncementProvider, NullNewsProvider,
};
use crate::reasoning::DeepSeekClient;
use crate::recovery::RecoveryManager;
use crate::retry::RetryPolicy;
use crate::service::{InvestigationTaskService, ServiceSettings};
use crate::storage::SqliteTaskRepository;
use crate::workflow::{CredibilityVerificationWorkflow, IndustryResearchWorkflow, WorkflowDeps};

/// How often running tasks are checked for staleness.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Intelligence service state
pub struct IntelState {
    /// Configuration
    pub config: Config,
    /// Task lifecycle service
    pub service: Arc<InvestigationTaskService>,
    /// Push channel for task events
    pub events: Arc<BroadcastEmitter>,
}

impl IntelState {
    /// Wire storage, providers, reasoning and workflows from configuration.
    pub fn from_config(config: Config) -> intel_common::Result<Self> {
        let repository = SqliteTaskRepository::open(&config.storage.database_path)?;
        let checkpoints = Arc::new(repository.checkpoint_store());
        let repository = Arc::new(repository);

        let provider_timeout = Duration::from_secs(config.providers.timeout_secs);
        let news: Arc<dyn NewsDataProvider> = match &config.providers.news_endpoint {
            Some(endpoint) => Arc::new(HttpNewsProvider::new(endpoint.clone(), provider_timeout)?),
            None => {
                tracing::info!("No news endpoint configured, news digests disabled");
                Arc::new(NullNewsProvider)
            }
        };
        let announcements: Arc<dyn AnnouncementDataProvider> = match &config.providers.lixin_token {
            Some(token) => Arc::new(LixinAnnouncementProvider::new(token.clone(), provider_timeout)?),
            None => {
                tracing::info!("No Lixinger token configured, announcements disabled");
                Arc::new(NullAnnouncementProvider)
            }
        };

        let deps = WorkflowDeps {
            reasoning: Arc::new(DeepSeekClient::new(&config.reasoning)?),
            news,
            announcements,
            checkpoints: checkpoints.clone(),
            retry: RetryPolicy::from_config(&config.agent_retry)?,
            news_days: config.providers.news_days,
            announcement_days: config.providers.announcement_days,
        };

        let events = Arc::new(BroadcastEmitter::default());
        let service = Arc::new(InvestigationTaskService::new(
            repository,
            checkpoints,
            events.clone(),
            Arc::new(IndustryResearchWorkflow::new(deps.clone())),
            Arc::new(CredibilityVerificationWorkflow::new(deps)),
            ServiceSettings::from_config(&config.tasks),
        ));

        Ok(Self {
            config,
            service,
            events,
        })
    }
}

/// Main intelligence service
pub struct IntelService {
    state: Arc<IntelState>,
}

impl IntelService {
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(IntelState::from_config(config)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> &Arc<IntelState> {
        &self.state
    }

    /// Recover interrupted tasks, then serve HTTP until shutdown.
    pub async fn start(self) -> Result<()> {
        let recovery = Arc::new(RecoveryManager::new(self.state.service.clone()));
        let report = recovery.recover().await?;
        if !report.details.is_empty() {
            tracing::info!(
                resumed = report.resumed,
                relaunched = report.relaunched,
                failed = report.failed,
                "Startup recovery finished"
            );
        }

        // Running tasks untouched for twice the task deadline are orphans.
        let stale_after = self.state.service.settings().task_timeout * 2;
        let sweeper = recovery.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STALE_SWEEP_INTERVAL);
            // The first tick is immediate; resumed tasks have not reported yet.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = sweeper.sweep_stale(stale_after).await {
                    tracing::warn!(error = %e, "Stale task sweep failed");
                }
            }
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = routes::router(self.state.clone()).layer(cors);

        let addr: SocketAddr = self.state.config.bind_address().parse()?;
        tracing::info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Intel research service stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
