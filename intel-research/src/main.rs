//! Intel Research - investigation task service.
//!
//! Runs industry research and credibility verification workflows in the
//! background and exposes them over HTTP.

use anyhow::Result;
use intel_common::logging::init_logging;
use intel_common::Config;
use intel_research::IntelService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Intel Research v{}", env!("CARGO_PKG_VERSION"));

    if config.reasoning.api_key.is_none() {
        tracing::warn!("DEEPSEEK_API_KEY not set, analysis tasks will fail");
    }

    let service = IntelService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
