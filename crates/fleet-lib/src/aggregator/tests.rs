//! Aggregator tests: fan-out, partial failure and snapshot caching

use super::*;
use crate::test_support::{
    add_agent, cluster_metrics, endpoint, router_with, system_info, ScriptedTransport,
};
use serde_json::json;

async fn fleet(transport: Arc<ScriptedTransport>) -> Arc<Router> {
    let router = Arc::new(router_with(transport.clone()));
    add_agent(&router, "k8s", AgentCategory::Orchestrator).await;
    for (i, id) in ["worker-1", "worker-2", "worker-3"].iter().enumerate() {
        add_agent(&router, id, AgentCategory::NodeAgent).await;
        transport.on(
            &endpoint(id),
            SYSTEM_INFO_TOOL,
            Ok(system_info(10.0 * (i + 1) as f64, 50.0, Some(100.0))),
        );
    }
    add_agent(&router, "bizon1", AgentCategory::HostAgent).await;
    transport.on(&endpoint("bizon1"), SYSTEM_INFO_TOOL, Ok(system_info(40.0, 30.0, None)));
    transport.on(&endpoint("k8s"), CLUSTER_METRICS_TOOL, Ok(cluster_metrics(21)));
    router
}

#[tokio::test]
async fn test_collect_cluster_without_orchestrator() {
    let transport = ScriptedTransport::new();
    let router = Arc::new(router_with(transport.clone()));
    add_agent(&router, "worker-1", AgentCategory::NodeAgent).await;
    let aggregator = Aggregator::new(router, AggregatorConfig::default());

    assert!(aggregator.collect_cluster().await.is_none());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_collect_cluster_reads_counts() {
    let transport = ScriptedTransport::new();
    let aggregator = Aggregator::new(fleet(transport.clone()).await, AggregatorConfig::default());

    let cluster = aggregator.collect_cluster().await.unwrap();
    assert_eq!(cluster.ready_nodes, 21);
    assert_eq!(cluster.gpu_nodes, 8);
    assert_eq!(transport.calls_for_tool(CLUSTER_METRICS_TOOL).len(), 1);
}

#[tokio::test]
async fn test_collect_nodes_default_categories_and_order() {
    let transport = ScriptedTransport::new();
    let aggregator = Aggregator::new(fleet(transport.clone()).await, AggregatorConfig::default());

    let nodes = aggregator.collect_nodes(None).await;
    let ids: Vec<_> = nodes.iter().map(|n| n.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["worker-1", "worker-2", "worker-3", "bizon1"]);
    assert_eq!(nodes[1].cpu_percent, 20.0);
    assert_eq!(nodes[3].category, AgentCategory::HostAgent);
    assert_eq!(transport.calls_to(&endpoint("k8s")), 0);

    let hosts = aggregator.collect_nodes(Some(&[AgentCategory::HostAgent])).await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].agent_id, "bizon1");
}

#[tokio::test]
async fn test_failed_node_does_not_abort_others() {
    let transport = ScriptedTransport::new();
    let router = fleet(transport.clone()).await;
    add_agent(&router, "worker-4", AgentCategory::NodeAgent).await;
    transport.delay(&endpoint("worker-1"), Duration::from_millis(30));
    let aggregator = Aggregator::new(router, AggregatorConfig::default());

    let nodes = aggregator.collect_nodes(Some(&[AgentCategory::NodeAgent])).await;

    assert_eq!(nodes.len(), 4);
    assert!(nodes[..3].iter().all(|n| n.is_ok()));
    assert_eq!(nodes[3].agent_id, "worker-4");
    assert!(nodes[3].error.as_deref().unwrap().contains("attempts failed"));
}

#[tokio::test]
async fn test_collect_all_builds_aggregates() {
    let transport = ScriptedTransport::new();
    let router = fleet(transport.clone()).await;
    add_agent(&router, "worker-4", AgentCategory::NodeAgent).await;
    let aggregator = Aggregator::new(router, AggregatorConfig::default());

    let snapshot = aggregator.collect_all(false).await;

    assert_eq!(snapshot.ready_nodes(), 21);
    assert_eq!(snapshot.total_agents, 6);
    assert_eq!(snapshot.healthy_agents, 5);
    assert_eq!(snapshot.avg_cpu_percent, 25.0);
    assert_eq!(snapshot.avg_memory_percent, 45.0);
    assert_eq!(snapshot.total_power_watts, Some(300.0));
}

#[tokio::test(start_paused = true)]
async fn test_collect_all_serves_cache_within_ttl() {
    let transport = ScriptedTransport::new();
    let aggregator = Aggregator::new(fleet(transport.clone()).await, AggregatorConfig::default());

    let first = aggregator.collect_all(false).await;
    tokio::time::advance(Duration::from_secs(10)).await;
    let second = aggregator.collect_all(false).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.timestamp, second.timestamp);
    assert_eq!(transport.calls_for_tool(CLUSTER_METRICS_TOOL).len(), 1);

    // snapshot timestamps are wall-clock, the paused runtime clock is not
    std::thread::sleep(Duration::from_millis(2));
    tokio::time::advance(Duration::from_secs(25)).await;
    let third = aggregator.collect_all(false).await;

    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.timestamp > first.timestamp);
    assert_eq!(transport.calls_for_tool(CLUSTER_METRICS_TOOL).len(), 2);
    assert!(Arc::ptr_eq(&aggregator.cached().await.unwrap(), &third));
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let transport = ScriptedTransport::new();
    let aggregator = Aggregator::new(fleet(transport.clone()).await, AggregatorConfig::default());

    let first = aggregator.collect_all(false).await;
    std::thread::sleep(Duration::from_millis(2));
    let second = aggregator.collect_all(true).await;

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.timestamp > first.timestamp);
    assert_eq!(transport.calls_for_tool(CLUSTER_METRICS_TOOL).len(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let transport = ScriptedTransport::new();
    let router = fleet(transport.clone()).await;
    transport.delay(&endpoint("k8s"), Duration::from_millis(50));
    let aggregator = Aggregator::new(router, AggregatorConfig::default());

    let (a, b, c) = tokio::join!(
        aggregator.collect_all(false),
        aggregator.collect_all(false),
        aggregator.collect_all(false)
    );

    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));
    assert_eq!(transport.calls_for_tool(CLUSTER_METRICS_TOOL).len(), 1);
}

#[tokio::test]
async fn test_summary_uses_cache() {
    let transport = ScriptedTransport::new();
    let aggregator = Aggregator::new(fleet(transport.clone()).await, AggregatorConfig::default());

    let snapshot = aggregator.collect_all(true).await;
    let summary = aggregator.summary().await;

    assert_eq!(summary.timestamp, snapshot.timestamp);
    assert_eq!(summary.cluster.unwrap().ready_nodes, 21);
    assert_eq!(transport.calls_for_tool(CLUSTER_METRICS_TOOL).len(), 1);
}

#[tokio::test]
async fn test_workload_distribution() {
    let transport = ScriptedTransport::new();
    let router = fleet(transport.clone()).await;
    transport.on(
        &endpoint("k8s"),
        WORKLOAD_DISTRIBUTION_TOOL,
        Ok(json!({"worker-1": {"pods": 12}, "worker-2": {"pods": 0}})),
    );
    let aggregator = Aggregator::new(router, AggregatorConfig::default());

    let result = aggregator.workload_distribution().await;
    assert!(result.success);
    assert_eq!(result.result.unwrap()["worker-1"]["pods"], 12);
}

#[tokio::test]
async fn test_workload_distribution_without_orchestrator() {
    let aggregator = Aggregator::new(
        Arc::new(router_with(ScriptedTransport::new())),
        AggregatorConfig::default(),
    );

    let result = aggregator.workload_distribution().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("No orchestrator"));
}
