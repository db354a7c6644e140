//! Fleet controller - closed-loop optimization daemon
//!
//! Registers the configured agents, runs optimization cycles on a fixed
//! interval and serves health, metrics and status over HTTP.

use anyhow::{Context, Result};
use fleet_controller::{api, config::ControllerConfig};
use fleet_lib::{
    aggregator::Aggregator,
    controller::{ControlLoopBuilder, Controller},
    health::HealthRegistry,
    observability::StructuredLogger,
    router::Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleet-controller");

    let config = ControllerConfig::load().context("Failed to load controller configuration")?;
    info!(
        agents = config.agents.len(),
        policies = config.policies.len(),
        dry_run = config.dry_run,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let router = Arc::new(Router::from_descriptors(config.router_config(), &config.agents).await);
    let aggregator = Arc::new(Aggregator::new(router.clone(), config.aggregator_config()));
    let controller = Arc::new(Controller::new(
        router.clone(),
        aggregator,
        config.controller_settings(),
    ));
    for policy in config.policies.iter().cloned() {
        controller.add_policy(policy).await;
    }

    let logger = StructuredLogger::new("fleet-controller");
    logger.log_startup(CONTROLLER_VERSION, config.agents.len(), config.policies.len());

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), controller.clone()));
    health_registry.set_ready(true).await;

    let api_port = config.listen_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let control_loop = ControlLoopBuilder::new()
        .controller(controller)
        .health(health_registry.clone())
        .interval(config.control_loop_config().interval)
        .dry_run(config.dry_run)
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(control_loop.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Lets an in-flight cycle finish before the client pool is dropped
    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Control loop task failed");
    }

    router.close().await;
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
