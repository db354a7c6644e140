//! Periodic control loop
//!
//! Runs an optimization cycle on a fixed interval until shutdown and
//! reflects each outcome in the health registry.

use super::{Controller, Cycle};
use crate::health::{Component, HealthRegistry};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Time between cycle starts (default: 5 minutes)
    pub interval: Duration,
    /// Cycle-level dry-run flag (default: true)
    pub dry_run: bool,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            dry_run: true,
        }
    }
}

pub struct ControlLoop {
    controller: Arc<Controller>,
    health: HealthRegistry,
    config: ControlLoopConfig,
}

impl ControlLoop {
    pub fn new(
        controller: Arc<Controller>,
        health: HealthRegistry,
        config: ControlLoopConfig,
    ) -> Self {
        Self {
            controller,
            health,
            config,
        }
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    /// Run cycles until `shutdown` fires. The first cycle starts immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            dry_run = self.config.dry_run,
            "Starting control loop"
        );
        self.health.set_healthy(Component::ControlLoop).await;

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }

        self.health
            .set_unhealthy(Component::ControlLoop, "Control loop stopped")
            .await;
    }

    /// Run a single cycle and update component health from its outcome
    pub async fn run_once(&self) -> Cycle {
        let cycle = self.controller.run_cycle(self.config.dry_run).await;

        if cycle.success {
            self.health.set_healthy(Component::Controller).await;
        } else {
            let reason = cycle
                .error
                .clone()
                .unwrap_or_else(|| format!("{} actions failed", cycle.failed_actions()));
            self.health
                .set_degraded(
                    Component::Controller,
                    format!("Cycle {} failed: {}", cycle.cycle_id, reason),
                )
                .await;
        }

        let unhealthy = self.controller.router().unhealthy_count().await;
        if unhealthy == 0 {
            self.health.set_healthy(Component::Router).await;
        } else {
            self.health
                .set_degraded(Component::Router, format!("{} agents unhealthy", unhealthy))
                .await;
        }

        match &cycle.metrics_after {
            Some(summary) if summary.total_agents == 0 => {
                self.health
                    .set_degraded(Component::Aggregator, "No agents reporting")
                    .await;
            }
            Some(_) => self.health.set_healthy(Component::Aggregator).await,
            None => {}
        }

        cycle
    }
}

/// Builder for the control loop
pub struct ControlLoopBuilder {
    controller: Option<Arc<Controller>>,
    health: Option<HealthRegistry>,
    config: ControlLoopConfig,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            controller: None,
            health: None,
            config: ControlLoopConfig::default(),
        }
    }

    pub fn controller(mut self, controller: Arc<Controller>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Health registry to report into; a private one is used if unset
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn build(self) -> Result<ControlLoop> {
        let controller = self
            .controller
            .ok_or_else(|| anyhow::anyhow!("Controller is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Control loop interval must be greater than zero");
        }

        Ok(ControlLoop::new(
            controller,
            self.health.unwrap_or_default(),
            self.config,
        ))
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
