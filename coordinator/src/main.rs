//! CoreBank service binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corebank_coordinator::{Coordinator, CoordinatorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting CoreBank");

    let config = CoordinatorConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let coordinator = Arc::new(Coordinator::new(config));
    coordinator.start().await?;

    info!(
        node_id = %coordinator.node_id(),
        pool = %coordinator.config().reconciliation.pool.account_number,
        timezone = %coordinator.config().reconciliation.timezone,
        "CoreBank running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    coordinator.stop().await?;
    info!(metrics = ?coordinator.metrics(), "CoreBank shutdown complete");
    Ok(())
}
