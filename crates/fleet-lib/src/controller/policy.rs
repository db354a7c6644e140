//! Optimization policies
//!
//! A policy inspects a snapshot and proposes zero or more actions. The set
//! of policy types is closed; thresholds and targets come from the
//! policy's `conditions` and `parameters` maps.

use super::action::{Action, ActionKind, CLUSTER_TARGET};
use crate::aggregator::Snapshot;
use crate::models::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const DEFAULT_MIN_NODES: f64 = 10.0;
const DEFAULT_TARGET_NODES: u64 = 5;
const DEFAULT_POWER_SAVE_THRESHOLD: f64 = 20.0;
const DEFAULT_PERFORMANCE_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Consolidate,
    ScaleDown,
    PowerSave,
    Performance,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Consolidate => "consolidate",
            PolicyKind::ScaleDown => "scale_down",
            PolicyKind::PowerSave => "power_save",
            PolicyKind::Performance => "performance",
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// A named, prioritized optimization rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Higher runs first
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: JsonMap,
    #[serde(default)]
    pub parameters: JsonMap,
}

impl Policy {
    pub fn new(name: impl Into<String>, kind: PolicyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            priority: 0,
            conditions: JsonMap::new(),
            parameters: JsonMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.to_string(), value.into());
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The policy's own dry-run flag; policies are dry-run unless told otherwise
    pub fn dry_run(&self) -> bool {
        self.parameters
            .get("dry_run")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    fn condition(&self, key: &str, default: f64) -> f64 {
        self.conditions
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    fn action(&self, kind: ActionKind, target: impl Into<String>, reason: String) -> Action {
        Action {
            reason,
            policy: self.name.clone(),
            priority: self.priority,
            ..Action::new(kind, target).with_dry_run(self.dry_run())
        }
    }

    /// Propose actions for `snapshot`. Does not look at `enabled`.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<Action> {
        match self.kind {
            PolicyKind::Consolidate => self.evaluate_consolidate(snapshot),
            PolicyKind::PowerSave => self.evaluate_governor(
                snapshot,
                DEFAULT_POWER_SAVE_THRESHOLD,
                "powersave",
                |cpu, threshold| cpu < threshold,
                "Low",
            ),
            PolicyKind::Performance => self.evaluate_governor(
                snapshot,
                DEFAULT_PERFORMANCE_THRESHOLD,
                "performance",
                |cpu, threshold| cpu > threshold,
                "High",
            ),
            PolicyKind::ScaleDown => {
                debug!(policy = %self.name, "scale_down policies propose no actions");
                Vec::new()
            }
        }
    }

    fn evaluate_consolidate(&self, snapshot: &Snapshot) -> Vec<Action> {
        let Some(cluster) = snapshot.cluster.as_ref() else {
            return Vec::new();
        };

        let min_nodes = self.condition("min_nodes", DEFAULT_MIN_NODES);
        let active = cluster.ready_nodes;
        if (active as f64) <= min_nodes {
            return Vec::new();
        }

        let target_nodes = self
            .parameters
            .get("target_nodes")
            .cloned()
            .unwrap_or_else(|| Value::from(DEFAULT_TARGET_NODES));

        let action = self
            .action(
                ActionKind::ConsolidateWorkloads,
                CLUSTER_TARGET,
                format!("Over-provisioned: {} > {} nodes", active, min_nodes),
            )
            .with_parameter("target_node_count", target_nodes);
        let dry_run = action.dry_run;

        vec![action.with_parameter("dry_run", dry_run)]
    }

    fn evaluate_governor(
        &self,
        snapshot: &Snapshot,
        default_threshold: f64,
        governor: &str,
        triggers: fn(f64, f64) -> bool,
        level: &str,
    ) -> Vec<Action> {
        let threshold = self.condition("cpu_threshold", default_threshold);

        snapshot
            .nodes
            .iter()
            .filter(|node| node.is_ok() && triggers(node.cpu_percent, threshold))
            .map(|node| {
                self.action(
                    ActionKind::SetGovernor,
                    node.agent_id.clone(),
                    format!("{} CPU usage: {:.1}%", level, node.cpu_percent),
                )
                .with_parameter("governor", governor)
            })
            .collect()
    }
}
