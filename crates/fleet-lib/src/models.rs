//! Core data models shared by the router, aggregator and controller

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Free-form JSON object used for tool arguments, metadata and policy maps
pub type JsonMap = serde_json::Map<String, Value>;

/// Category of a remote agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentCategory {
    /// Cluster orchestrator agent (one per cluster)
    #[serde(rename = "k8s")]
    Orchestrator,
    /// System agent running inside a node VM
    #[serde(rename = "vm_system")]
    NodeAgent,
    /// System agent running on the physical host
    #[serde(rename = "host_system")]
    HostAgent,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentCategory::Orchestrator => "k8s",
            AgentCategory::NodeAgent => "vm_system",
            AgentCategory::HostAgent => "host_system",
        }
    }
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered remote agent
///
/// Records are never mutated in place: health changes produce a new
/// record that replaces the registry slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub category: AgentCategory,
    pub endpoint: String,
    pub hostname: String,
    pub healthy: bool,
    pub last_contact: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl AgentRecord {
    pub fn new(
        id: impl Into<String>,
        category: AgentCategory,
        endpoint: impl Into<String>,
        hostname: impl Into<String>,
        metadata: JsonMap,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            endpoint: endpoint.into(),
            hostname: hostname.into(),
            healthy: true,
            last_contact: Utc::now(),
            metadata,
        }
    }

    /// True when the agent has not been contacted within `window`.
    /// Independent of the health flag.
    pub fn is_stale(&self, window: Duration) -> bool {
        (Utc::now() - self.last_contact)
            .to_std()
            .map(|age| age > window)
            .unwrap_or(false)
    }

    /// Copy of this record with the given health flag and a fresh contact time
    pub fn with_health(&self, healthy: bool) -> Self {
        Self {
            healthy,
            last_contact: Utc::now(),
            ..self.clone()
        }
    }
}

/// Agent entry as it appears in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub category: AgentCategory,
    pub endpoint: String,
    pub hostname: String,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl AgentDescriptor {
    /// Reject descriptors that could never be routed to
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("Agent descriptor has an empty id");
        }

        let url = url::Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid endpoint for agent {}: {}", self.id, self.endpoint))?;

        match url.scheme() {
            "http" | "https" => Ok(()),
            other => anyhow::bail!(
                "Unsupported endpoint scheme '{}' for agent {}",
                other,
                self.id
            ),
        }
    }
}

/// Outcome of one routed tool call (covering all retry attempts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub success: bool,
    pub agent_id: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl CallResult {
    pub fn succeeded(
        agent_id: impl Into<String>,
        tool: impl Into<String>,
        result: Value,
        duration_ms: f64,
    ) -> Self {
        Self {
            success: true,
            agent_id: agent_id.into(),
            tool: tool.into(),
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(
        agent_id: impl Into<String>,
        tool: impl Into<String>,
        error: impl ToString,
        duration_ms: f64,
    ) -> Self {
        Self {
            success: false,
            agent_id: agent_id.into(),
            tool: tool.into(),
            result: None,
            error: Some(error.to_string()),
            duration_ms,
        }
    }
}
