//! Planned actions and their execution results

use crate::models::JsonMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target used by actions that apply to the whole cluster
pub const CLUSTER_TARGET: &str = "cluster";

/// Closed set of operations the controller can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ConsolidateWorkloads,
    DrainNode,
    SetGovernor,
    SetPowerCap,
    CordonNode,
    UncordonNode,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ConsolidateWorkloads => "consolidate_workloads",
            ActionKind::DrainNode => "drain_node",
            ActionKind::SetGovernor => "set_governor",
            ActionKind::SetPowerCap => "set_power_cap",
            ActionKind::CordonNode => "cordon_node",
            ActionKind::UncordonNode => "uncordon_node",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned operation, produced fresh every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Agent id or [`CLUSTER_TARGET`]
    pub target: String,
    #[serde(default)]
    pub parameters: JsonMap,
    pub reason: String,
    /// Name of the policy that proposed this action
    pub policy: String,
    pub priority: i32,
    pub dry_run: bool,
}

impl Action {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            parameters: JsonMap::new(),
            reason: String::new(),
            policy: String::new(),
            priority: 0,
            dry_run: true,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of executing one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}
