//! ASG autoscaler - Kubernetes worker-node autoscaler for AWS
//!
//! Periodically sizes every Auto Scaling Group so that all scheduled and
//! pending workloads fit with a configurable buffer, and applies the
//! resulting desired capacities.

use anyhow::{Context, Result};
use autoscaler_lib::health::{components, HealthRegistry};
use autoscaler_lib::observability::StructuredLogger;
use autoscaler_lib::provider::{AwsAutoscalingApi, KubeClusterApi};
use autoscaler_lib::AutoscaleLoop;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.debug { "debug" } else { "info" })
        }))
        .with(fmt::layer().json())
        .init();

    // A malformed buffer quantity is fatal before the first iteration
    let scaling = cli.scaling_config()?;
    let loop_config = cli.loop_config();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::CLOUD).await;
    health_registry.register(components::DECISION_LOOP).await;

    let logger = StructuredLogger::new();
    logger.log_startup(AUTOSCALER_VERSION, cli.interval, cli.dry_run);
    if cli.dry_run {
        info!("Dry-run mode: no capacity will be changed");
    }

    let cluster = Arc::new(
        KubeClusterApi::connect(&cli.asg_label)
            .await
            .context("Failed to connect to the Kubernetes API")?,
    );
    let cloud = Arc::new(AwsAutoscalingApi::connect().await);

    let autoscale = AutoscaleLoop::new(
        cluster,
        cloud,
        scaling,
        loop_config,
        health_registry.clone(),
    );

    // Health, status and metrics server
    let _api_server = tokio::spawn(api::serve(
        cli.api_port,
        api::AppState {
            health: health_registry.clone(),
            status: autoscale.status(),
        },
    ));
    health_registry.set_ready(true).await;

    if cli.once {
        let outcome = autoscale.run_once().await?;
        logger.log_iteration(outcome.decisions.len(), outcome.applied, outcome.failed);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(autoscale.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;

    Ok(())
}
