//! Shared helpers for unit tests: an in-memory scripted transport

use crate::models::{AgentCategory, JsonMap};
use crate::router::{Router, RouterConfig, RouterError, ToolCallRequest, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call observed by the scripted transport
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub tool: String,
    pub arguments: JsonMap,
}

type Reply = Result<Value, RouterError>;

/// Transport whose replies are scripted per (endpoint, tool)
///
/// Queued replies are consumed first, then the standing reply is repeated.
/// Unscripted calls fail with a transport error.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<(String, String), VecDeque<Reply>>>,
    standing: Mutex<HashMap<(String, String), Reply>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Always answer `tool` on `endpoint` with `reply`
    pub fn on(&self, endpoint: &str, tool: &str, reply: Reply) {
        self.standing
            .lock()
            .unwrap()
            .insert((endpoint.to_string(), tool.to_string()), reply);
    }

    /// Answer the next calls with `replies`, in order
    pub fn queue(&self, endpoint: &str, tool: &str, replies: Vec<Reply>) {
        self.queued
            .lock()
            .unwrap()
            .entry((endpoint.to_string(), tool.to_string()))
            .or_default()
            .extend(replies);
    }

    /// Delay every call to `endpoint`
    pub fn delay(&self, endpoint: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .count()
    }

    pub fn calls_for_tool(&self, tool: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tool == tool)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, endpoint: &str, request: &ToolCallRequest) -> Result<Value, RouterError> {
        self.calls.lock().unwrap().push(RecordedCall {
            endpoint: endpoint.to_string(),
            tool: request.tool().to_string(),
            arguments: request.params.arguments.clone(),
        });

        let delay = self.delays.lock().unwrap().get(endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = (endpoint.to_string(), request.tool().to_string());
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        if let Some(reply) = queued {
            return reply;
        }

        self.standing
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(RouterError::Transport("connection refused".to_string())))
    }
}

/// Router config with millisecond backoff so retry tests stay fast
pub fn fast_config() -> RouterConfig {
    RouterConfig {
        call_timeout: Duration::from_secs(1),
        max_retries: 3,
        backoff_step: Duration::from_millis(1),
        stale_after: Duration::from_secs(300),
    }
}

pub fn endpoint(id: &str) -> String {
    format!("http://{}:8765/mcp", id)
}

pub fn router_with(transport: Arc<ScriptedTransport>) -> Router {
    Router::with_transport(fast_config(), transport)
}

/// Register an agent whose hostname is `<id>.local`
pub async fn add_agent(router: &Router, id: &str, category: AgentCategory) {
    router
        .register(id, category, endpoint(id), format!("{}.local", id), JsonMap::new())
        .await;
}

/// A `system_info` payload
pub fn system_info(cpu: f64, memory: f64, power: Option<f64>) -> Value {
    let mut payload = serde_json::json!({
        "hostname": "node",
        "cpu_percent": cpu,
        "memory_percent": memory,
        "load_avg": [0.5, 0.4, 0.3],
    });
    if let Some(watts) = power {
        payload["power_watts"] = Value::from(watts);
    }
    payload
}

/// A `get_cluster_metrics` payload
pub fn cluster_metrics(ready_nodes: u32) -> Value {
    serde_json::json!({
        "total_nodes": ready_nodes + 1,
        "ready_nodes": ready_nodes,
        "schedulable_nodes": ready_nodes,
        "total_pods": 40,
        "running_pods": 38,
        "pending_pods": 2,
        "cpu_utilization": 0.0,
        "memory_utilization": 0.0,
        "gpu_nodes": 8,
        "gpu_pods": 3
    })
}
