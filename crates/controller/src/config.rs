//! Controller configuration
//!
//! Loaded from an optional file (`FLEET_CONFIG`, default `fleet.yaml`)
//! layered under `FLEET_*` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use fleet_lib::{
    aggregator::AggregatorConfig,
    controller::{ControlLoopConfig, ControllerSettings, Policy},
    models::AgentDescriptor,
    router::RouterConfig,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "FLEET_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "fleet.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Port for health, metrics and status endpoints
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Cycle-level dry-run; overrides every policy when set
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_step")]
    pub backoff_step_ms: u64,

    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Cycles kept in memory; unset keeps every cycle
    #[serde(default)]
    pub history_limit: Option<usize>,

    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,

    #[serde(default)]
    pub policies: Vec<Policy>,
}

fn default_listen_port() -> u16 {
    8080
}

fn default_cycle_interval() -> u64 {
    300
}

fn default_dry_run() -> bool {
    true
}

fn default_call_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_step() -> u64 {
    1000
}

fn default_stale_after() -> u64 {
    300
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    1000
}

impl ControllerConfig {
    /// Load from the configured file (if present) and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config = Config::builder()
            .add_source(File::from(Path::new(&path)).required(false))
            .add_source(
                Environment::with_prefix("FLEET")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        Self::from_config(config)
    }

    /// Load from a single file, ignoring the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid controller configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if self.cycle_interval_secs == 0 {
            anyhow::bail!("cycle_interval_secs must be greater than zero");
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !ids.insert(agent.id.as_str()) {
                anyhow::bail!("Duplicate agent id: {}", agent.id);
            }
        }

        if let Some(policy) = self.policies.iter().find(|p| p.name.trim().is_empty()) {
            anyhow::bail!("Policy of type {} has an empty name", policy.kind.as_str());
        }

        Ok(())
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            max_retries: self.max_retries,
            backoff_step: Duration::from_millis(self.backoff_step_ms),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            ..AggregatorConfig::default()
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            history_limit: self.history_limit,
        }
    }

    pub fn control_loop_config(&self) -> ControlLoopConfig {
        ControlLoopConfig {
            interval: Duration::from_secs(self.cycle_interval_secs),
            dry_run: self.dry_run,
        }
    }
}
