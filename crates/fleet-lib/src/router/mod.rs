//! Agent registry and call routing
//!
//! The router owns the set of known agents, resolves logical targets
//! (ids or aliases) to records, performs tool calls with bounded retry
//! and linear backoff, and tracks per-agent health from call outcomes.

mod error;
mod registry;
mod transport;


pub use error::RouterError;
pub use registry::AgentRegistry;
pub use transport::{
    interpret_response, HttpTransport, ToolCallParams, ToolCallRequest, Transport,
    INVOKE_METHOD, PROTOCOL_VERSION,
};

use crate::models::{AgentCategory, AgentDescriptor, AgentRecord, CallResult, JsonMap};
use crate::observability::{FleetMetrics, StructuredLogger};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-attempt network timeout (default: 30 seconds)
    pub call_timeout: Duration,
    /// Attempts per call before the agent is marked unhealthy (default: 3)
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n * backoff_step` (default: 1 second)
    pub backoff_step: Duration,
    /// Agents not contacted within this window are stale (default: 300 seconds)
    pub stale_after: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_step: Duration::from_secs(1),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Routes tool calls to registered agents
pub struct Router {
    config: RouterConfig,
    registry: RwLock<AgentRegistry>,
    transport: Arc<dyn Transport>,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl Router {
    /// Create a router that talks HTTP to agents
    pub fn new(config: RouterConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.call_timeout));
        Self::with_transport(config, transport)
    }

    /// Create a router over a custom transport
    pub fn with_transport(config: RouterConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            registry: RwLock::new(AgentRegistry::new()),
            transport,
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("router"),
        }
    }

    /// Create an HTTP router and register every descriptor
    pub async fn from_descriptors(config: RouterConfig, descriptors: &[AgentDescriptor]) -> Self {
        let router = Self::new(config);
        for descriptor in descriptors {
            router.register_descriptor(descriptor).await;
        }
        router
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register (or re-register) an agent and alias its hostname to its id
    pub async fn register(
        &self,
        id: impl Into<String>,
        category: AgentCategory,
        endpoint: impl Into<String>,
        hostname: impl Into<String>,
        metadata: JsonMap,
    ) -> AgentRecord {
        let record = AgentRecord::new(id, category, endpoint, hostname, metadata);
        let stored = self.registry.write().await.insert(record);

        info!(
            agent_id = %stored.id,
            category = %stored.category,
            endpoint = %stored.endpoint,
            "Registered agent"
        );
        self.refresh_unhealthy_gauge().await;

        stored.as_ref().clone()
    }

    pub async fn register_descriptor(&self, descriptor: &AgentDescriptor) -> AgentRecord {
        self.register(
            descriptor.id.clone(),
            descriptor.category,
            descriptor.endpoint.clone(),
            descriptor.hostname.clone(),
            descriptor.metadata.clone(),
        )
        .await
    }

    /// Remove an agent and all aliases pointing at it
    pub async fn unregister(&self, id: &str) -> Option<AgentRecord> {
        let removed = self.registry.write().await.remove(id);
        if removed.is_some() {
            info!(agent_id = %id, "Unregistered agent");
            self.refresh_unhealthy_gauge().await;
        }
        removed.map(|r| r.as_ref().clone())
    }

    /// Add an extra routing alias for a registered agent
    pub async fn add_alias(&self, alias: impl Into<String>, id: &str) -> bool {
        self.registry.write().await.add_alias(alias, id)
    }

    /// Resolve an id or alias to an agent record
    pub async fn resolve(&self, target: &str) -> Option<AgentRecord> {
        self.registry
            .read()
            .await
            .resolve(target)
            .map(|r| r.as_ref().clone())
    }

    /// List agents in registration order, filtered by category then health.
    /// `healthy_only` drops both unhealthy and stale agents.
    pub async fn list(
        &self,
        category: Option<AgentCategory>,
        healthy_only: bool,
    ) -> Vec<AgentRecord> {
        let registry = self.registry.read().await;
        registry
            .iter()
            .filter(|r| category.map_or(true, |c| r.category == c))
            .filter(|r| !healthy_only || (r.healthy && !r.is_stale(self.config.stale_after)))
            .map(|r| r.as_ref().clone())
            .collect()
    }

    /// Override an agent's health flag. Also refreshes its contact time.
    pub async fn set_health(&self, id: &str, healthy: bool) -> Option<AgentRecord> {
        self.update_health(id, healthy).await
    }

    pub async fn unhealthy_count(&self) -> usize {
        self.registry
            .read()
            .await
            .iter()
            .filter(|r| !r.healthy)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.read().await.is_empty()
    }

    /// Route a tool call to `target` and return its outcome.
    ///
    /// Unknown targets and agents already marked unhealthy fail without a
    /// network attempt. Otherwise up to `max_retries` attempts are made,
    /// waiting `attempt * backoff_step` between them.
    pub async fn invoke(&self, target: &str, tool: &str, params: JsonMap) -> CallResult {
        let Some(agent) = self.resolve(target).await else {
            let err = RouterError::NotFound(target.to_string());
            warn!(target = %target, tool = %tool, "No agent found for target");
            self.metrics.inc_call_failures(err.reason());
            return CallResult::failed(target, tool, err, 0.0);
        };

        if !agent.healthy {
            let err = RouterError::Unhealthy(agent.id.clone());
            debug!(agent_id = %agent.id, tool = %tool, "Skipping call to unhealthy agent");
            self.metrics.inc_call_failures(err.reason());
            return CallResult::failed(agent.id, tool, err, 0.0);
        }

        let request = ToolCallRequest::new(tool, params);
        let attempts = self.config.max_retries.max(1);
        let start = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            self.metrics.inc_call_attempts();

            match self.transport.call(&agent.endpoint, &request).await {
                Ok(result) => {
                    let elapsed = start.elapsed();
                    self.metrics.observe_call_latency(elapsed.as_secs_f64());
                    self.update_health(&agent.id, true).await;

                    debug!(
                        agent_id = %agent.id,
                        tool = %tool,
                        attempt = attempt + 1,
                        elapsed_ms = elapsed.as_millis(),
                        "Tool call succeeded"
                    );
                    return CallResult::succeeded(agent.id, tool, result, millis(elapsed));
                }
                Err(err) => {
                    match &err {
                        RouterError::Remote(message) => warn!(
                            agent_id = %agent.id,
                            tool = %tool,
                            attempt = attempt + 1,
                            error = %message,
                            "Agent reported tool error"
                        ),
                        other => warn!(
                            agent_id = %agent.id,
                            tool = %tool,
                            attempt = attempt + 1,
                            error = %other,
                            "Tool call attempt failed"
                        ),
                    }
                    last_error = err.to_string();

                    if attempt + 1 < attempts {
                        self.metrics.inc_call_retries();
                        tokio::time::sleep(self.config.backoff_step * (attempt + 1)).await;
                    }
                }
            }
        }

        self.update_health(&agent.id, false).await;

        let err = RouterError::RetriesExhausted {
            attempts,
            last: last_error,
        };
        self.metrics.inc_call_failures(err.reason());
        CallResult::failed(agent.id, tool, err, millis(start.elapsed()))
    }

    /// Call `tool` on every healthy agent (optionally of one category).
    ///
    /// Results come back in the order of `list(category, true)` regardless
    /// of completion order. Individual failures never abort the broadcast.
    pub async fn broadcast(
        &self,
        tool: &str,
        params: &JsonMap,
        category: Option<AgentCategory>,
        parallel: bool,
    ) -> Vec<CallResult> {
        let agents = self.list(category, true).await;
        debug!(tool = %tool, agents = agents.len(), parallel = parallel, "Broadcasting tool call");

        if parallel {
            join_all(
                agents
                    .iter()
                    .map(|agent| self.invoke(&agent.id, tool, params.clone())),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(agents.len());
            for agent in &agents {
                results.push(self.invoke(&agent.id, tool, params.clone()).await);
            }
            results
        }
    }

    /// Release the transport's pooled connections
    pub async fn close(&self) {
        self.transport.close().await;
    }

    async fn update_health(&self, id: &str, healthy: bool) -> Option<AgentRecord> {
        let updated = self
            .registry
            .write()
            .await
            .update(id, |r| r.with_health(healthy));

        let (previous, current) = updated?;
        if previous.healthy != current.healthy {
            self.logger.log_agent_health(id, healthy);
            self.refresh_unhealthy_gauge().await;
        }

        Some(current.as_ref().clone())
    }

    async fn refresh_unhealthy_gauge(&self) {
        let count = self.unhealthy_count().await;
        self.metrics.set_unhealthy_agents(count as i64);
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
