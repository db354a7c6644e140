//! Snapshot data types
//!
//! A snapshot is built once from raw collection results and never patched
//! afterwards. Derived aggregates are computed in [`Snapshot::new`].

use crate::models::{AgentCategory, AgentRecord, JsonMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// System-info fields lifted into typed [`NodeMetrics`] fields
const KNOWN_NODE_FIELDS: [&str; 4] = ["cpu_percent", "memory_percent", "power_watts", "hostname"];

/// Cluster-level metrics reported by the orchestrator agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_nodes: u64,
    pub ready_nodes: u64,
    pub schedulable_nodes: u64,
    pub total_pods: u64,
    pub running_pods: u64,
    pub pending_pods: u64,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub gpu_nodes: u64,
    pub gpu_pods: u64,
}

impl ClusterMetrics {
    /// Build from a `get_cluster_metrics` payload. Missing fields read as zero.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            timestamp: Utc::now(),
            total_nodes: count(payload, "total_nodes"),
            ready_nodes: count(payload, "ready_nodes"),
            schedulable_nodes: count(payload, "schedulable_nodes"),
            total_pods: count(payload, "total_pods"),
            running_pods: count(payload, "running_pods"),
            pending_pods: count(payload, "pending_pods"),
            cpu_utilization: number(payload, "cpu_utilization").unwrap_or(0.0),
            memory_utilization: number(payload, "memory_utilization").unwrap_or(0.0),
            gpu_nodes: count(payload, "gpu_nodes"),
            gpu_pods: count(payload, "gpu_pods"),
        }
    }
}

/// Metrics from a single node or host agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub agent_id: String,
    pub hostname: String,
    pub category: AgentCategory,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub power_watts: Option<f64>,
    /// Every other system-info field, passed through untouched
    #[serde(default)]
    pub additional: JsonMap,
    pub error: Option<String>,
}

impl NodeMetrics {
    /// Build from a `system_info` payload
    pub fn from_payload(agent: &AgentRecord, payload: &Value) -> Self {
        let additional = payload
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(key, _)| !KNOWN_NODE_FIELDS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            agent_id: agent.id.clone(),
            hostname: agent.hostname.clone(),
            category: agent.category,
            timestamp: Utc::now(),
            cpu_percent: number(payload, "cpu_percent").unwrap_or(0.0),
            memory_percent: number(payload, "memory_percent").unwrap_or(0.0),
            power_watts: number(payload, "power_watts"),
            additional,
            error: None,
        }
    }

    /// Placeholder for an agent whose call failed
    pub fn failed(agent: &AgentRecord, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent.id.clone(),
            hostname: agent.hostname.clone(),
            category: agent.category,
            timestamp: Utc::now(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            power_watts: None,
            additional: JsonMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Immutable aggregated view of the fleet at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cluster: Option<ClusterMetrics>,
    pub nodes: Vec<NodeMetrics>,
    /// Node agents plus the orchestrator when it answered
    pub total_agents: usize,
    /// Node agents without an error plus the orchestrator when it answered.
    /// Unlike node-only counting, a collected cluster record counts as one
    /// healthy agent, so `healthy_agents == total_agents` when every call
    /// succeeded.
    pub healthy_agents: usize,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    /// Sum over healthy nodes reporting power; `None` when none do
    pub total_power_watts: Option<f64>,
}

impl Snapshot {
    pub fn new(cluster: Option<ClusterMetrics>, nodes: Vec<NodeMetrics>) -> Self {
        let cluster_count = usize::from(cluster.is_some());
        let valid: Vec<&NodeMetrics> = nodes.iter().filter(|n| n.is_ok()).collect();

        let (avg_cpu_percent, avg_memory_percent) = if valid.is_empty() {
            (0.0, 0.0)
        } else {
            let n = valid.len() as f64;
            (
                valid.iter().map(|m| m.cpu_percent).sum::<f64>() / n,
                valid.iter().map(|m| m.memory_percent).sum::<f64>() / n,
            )
        };

        let powered: Vec<f64> = valid.iter().filter_map(|m| m.power_watts).collect();
        let total_power_watts = (!powered.is_empty()).then(|| powered.iter().sum());

        Self {
            timestamp: Utc::now(),
            total_agents: nodes.len() + cluster_count,
            healthy_agents: valid.len() + cluster_count,
            avg_cpu_percent,
            avg_memory_percent,
            total_power_watts,
            cluster,
            nodes,
        }
    }

    /// Ready-node count reported by the orchestrator, zero when absent
    pub fn ready_nodes(&self) -> u64 {
        self.cluster.as_ref().map_or(0, |c| c.ready_nodes)
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            timestamp: self.timestamp,
            total_agents: self.total_agents,
            healthy_agents: self.healthy_agents,
            avg_cpu_percent: round2(self.avg_cpu_percent),
            avg_memory_percent: round2(self.avg_memory_percent),
            total_power_watts: self.total_power_watts.map(round2),
            cluster: self.cluster.as_ref().map(|c| ClusterSummary {
                total_nodes: c.total_nodes,
                ready_nodes: c.ready_nodes,
                total_pods: c.total_pods,
                running_pods: c.running_pods,
            }),
        }
    }
}

/// Compact, serializable view of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub timestamp: DateTime<Utc>,
    pub total_agents: usize,
    pub healthy_agents: usize,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_power_watts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: u64,
    pub ready_nodes: u64,
    pub total_pods: u64,
    pub running_pods: u64,
}

impl SnapshotSummary {
    /// Look up a top-level numeric metric by name.
    /// `cluster.<field>` reaches into the cluster block.
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "total_agents" => Some(self.total_agents as f64),
            "healthy_agents" => Some(self.healthy_agents as f64),
            "avg_cpu_percent" => Some(self.avg_cpu_percent),
            "avg_memory_percent" => Some(self.avg_memory_percent),
            "total_power_watts" => self.total_power_watts,
            "cluster.total_nodes" => self.cluster.as_ref().map(|c| c.total_nodes as f64),
            "cluster.ready_nodes" => self.cluster.as_ref().map(|c| c.ready_nodes as f64),
            "cluster.total_pods" => self.cluster.as_ref().map(|c| c.total_pods as f64),
            "cluster.running_pods" => self.cluster.as_ref().map(|c| c.running_pods as f64),
            _ => None,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn number(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

fn count(payload: &Value, key: &str) -> u64 {
    payload
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .unwrap_or(0)
}
