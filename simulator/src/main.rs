//! CoreBank simulator
//!
//! Drives concurrent random workloads through the coordinator and checks
//! that money is conserved. Prints a JSON summary on stdout.

use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::{SimulationConfig, SimulationController};
use scenario::Scenario;

/// CoreBank simulator CLI
#[derive(Parser, Debug)]
#[command(name = "corebank-simulator")]
#[command(about = "Concurrent workload generator and invariant checker for CoreBank")]
struct Args {
    /// Number of customer accounts to open
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Concurrent workers
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "200")]
    operations: usize,

    /// Opening balance of every account
    #[arg(long, default_value = "10000")]
    opening_balance: Decimal,

    /// Scenario to run: mixed, contention or drift
    #[arg(short, long, default_value = "mixed")]
    scenario: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let scenario = Scenario::load(&args.scenario)?;

    let controller = SimulationController::new(SimulationConfig {
        accounts: args.accounts,
        workers: args.workers,
        operations: args.operations,
        opening_balance: args.opening_balance,
        seed: args.seed,
        scenario,
    });
    info!(seed = controller.seed(), "Starting CoreBank simulator");

    controller.initialize().await?;
    let summary = controller.run().await;
    controller.shutdown().await?;
    let summary = summary?;

    info!(
        total = summary.client.total,
        succeeded = summary.client.succeeded,
        failed = summary.client.failed,
        p99_us = summary.client.latency_p99_us,
        "Simulation complete"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.conservation.ok {
        anyhow::bail!("conservation check failed");
    }
    Ok(())
}
