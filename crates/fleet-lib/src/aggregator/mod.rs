//! Fleet metrics aggregation
//!
//! Fans out telemetry calls across agents, assembles an immutable
//! [`Snapshot`] and caches the most recent one for a bounded window.

mod snapshot;

#[cfg(test)]
mod tests;

pub use snapshot::{ClusterMetrics, ClusterSummary, NodeMetrics, Snapshot, SnapshotSummary};

use crate::models::{AgentCategory, AgentRecord, CallResult, JsonMap};
use crate::observability::{FleetMetrics, StructuredLogger};
use crate::router::Router;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Orchestrator tool returning cluster-wide counts
pub const CLUSTER_METRICS_TOOL: &str = "get_cluster_metrics";

/// Node tool returning CPU, memory and optional power draw
pub const SYSTEM_INFO_TOOL: &str = "system_info";

/// Orchestrator tool returning pod placement per node
pub const WORKLOAD_DISTRIBUTION_TOOL: &str = "get_workload_distribution";

/// Configuration for the aggregator
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// How long a snapshot is served from cache (default: 30 seconds)
    pub cache_ttl: Duration,
    /// Categories polled by `collect_nodes` when none are given
    pub node_categories: Vec<AgentCategory>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            node_categories: vec![AgentCategory::NodeAgent, AgentCategory::HostAgent],
        }
    }
}

struct CachedSnapshot {
    snapshot: Arc<Snapshot>,
    taken_at: Instant,
}

/// Collects and caches fleet snapshots
pub struct Aggregator {
    router: Arc<Router>,
    config: AggregatorConfig,
    cache: RwLock<Option<CachedSnapshot>>,
    /// Serializes refreshes so a burst of callers triggers one fan-out
    refresh_lock: Mutex<()>,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl Aggregator {
    pub fn new(router: Arc<Router>, config: AggregatorConfig) -> Self {
        Self {
            router,
            config,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("aggregator"),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The orchestrator agent, if one is registered
    async fn orchestrator(&self) -> Option<AgentRecord> {
        self.router
            .list(Some(AgentCategory::Orchestrator), false)
            .await
            .into_iter()
            .next()
    }

    /// Query the orchestrator for cluster metrics.
    /// Returns `None` when no orchestrator is registered or the call fails.
    pub async fn collect_cluster(&self) -> Option<ClusterMetrics> {
        let Some(orchestrator) = self.orchestrator().await else {
            warn!("No orchestrator agent registered");
            return None;
        };

        let result = self
            .router
            .invoke(&orchestrator.id, CLUSTER_METRICS_TOOL, JsonMap::new())
            .await;

        if !result.success {
            warn!(
                agent_id = %orchestrator.id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Failed to collect cluster metrics"
            );
            return None;
        }

        let payload = result.result.unwrap_or_default();
        Some(ClusterMetrics::from_payload(&payload))
    }

    /// Query every agent in `categories` concurrently.
    ///
    /// Failed agents contribute an error-only record; order follows the
    /// category list, then registration order.
    pub async fn collect_nodes(&self, categories: Option<&[AgentCategory]>) -> Vec<NodeMetrics> {
        let categories = categories.unwrap_or(self.config.node_categories.as_slice());

        let mut agents = Vec::new();
        for category in categories {
            agents.extend(self.router.list(Some(*category), false).await);
        }

        join_all(agents.iter().map(|agent| self.collect_node(agent))).await
    }

    async fn collect_node(&self, agent: &AgentRecord) -> NodeMetrics {
        let result = self
            .router
            .invoke(&agent.id, SYSTEM_INFO_TOOL, JsonMap::new())
            .await;

        if result.success {
            NodeMetrics::from_payload(agent, &result.result.unwrap_or_default())
        } else {
            let error = result.error.unwrap_or_else(|| "unknown error".to_string());
            debug!(agent_id = %agent.id, error = %error, "Node collection failed");
            NodeMetrics::failed(agent, error)
        }
    }

    /// Return the cached snapshot while fresh, otherwise collect a new one.
    pub async fn collect_all(&self, force_refresh: bool) -> Arc<Snapshot> {
        if !force_refresh {
            if let Some(snapshot) = self.fresh_cached().await {
                self.metrics.inc_snapshot_cache_hits();
                return snapshot;
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if !force_refresh {
            if let Some(snapshot) = self.fresh_cached().await {
                self.metrics.inc_snapshot_cache_hits();
                return snapshot;
            }
        }

        info!("Collecting metrics from all agents");
        let start = Instant::now();

        let (cluster, nodes) = tokio::join!(self.collect_cluster(), self.collect_nodes(None));
        let snapshot = Arc::new(Snapshot::new(cluster, nodes));

        *self.cache.write().await = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            taken_at: Instant::now(),
        });

        self.metrics.inc_snapshot_refreshes();
        self.logger.log_snapshot(
            snapshot.total_agents,
            snapshot.healthy_agents,
            start.elapsed().as_millis(),
        );

        snapshot
    }

    /// The cached snapshot regardless of age
    pub async fn cached(&self) -> Option<Arc<Snapshot>> {
        self.cache.read().await.as_ref().map(|c| c.snapshot.clone())
    }

    async fn fresh_cached(&self) -> Option<Arc<Snapshot>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.taken_at.elapsed() < self.config.cache_ttl)
            .map(|c| c.snapshot.clone())
    }

    /// Summary of the current (possibly cached) snapshot
    pub async fn summary(&self) -> SnapshotSummary {
        self.collect_all(false).await.summary()
    }

    /// Pod placement as reported by the orchestrator
    pub async fn workload_distribution(&self) -> CallResult {
        match self.orchestrator().await {
            Some(orchestrator) => {
                self.router
                    .invoke(&orchestrator.id, WORKLOAD_DISTRIBUTION_TOOL, JsonMap::new())
                    .await
            }
            None => CallResult::failed(
                "cluster",
                WORKLOAD_DISTRIBUTION_TOOL,
                "No orchestrator agent registered",
                0.0,
            ),
        }
    }
}
