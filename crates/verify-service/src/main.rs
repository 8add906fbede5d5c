//! Face Verification Service - Main Entry Point

use anyhow::Context;
use tracing::info;
use verify_service::{init_logging, run_server, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    info!("=== Face Verification Service v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Verifying {} ({}), window {}ms",
        config.target.display_name, config.target.id, config.verification.collector.window_ms
    );

    run_server(config).await?;

    Ok(())
}
