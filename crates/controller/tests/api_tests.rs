//! Integration tests for the controller API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fleet_controller::api::{create_router, AppState};
use fleet_lib::{
    aggregator::{Aggregator, AggregatorConfig},
    controller::{Controller, ControllerSettings},
    health::{Component, HealthRegistry},
    models::{AgentCategory, JsonMap},
    router::{Router as FleetRouter, RouterConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let router = Arc::new(FleetRouter::new(RouterConfig::default()));
    let aggregator = Arc::new(Aggregator::new(router.clone(), AggregatorConfig::default()));
    let settings = ControllerSettings {
        settle_delay: Duration::ZERO,
        history_limit: None,
    };
    let controller = Arc::new(Controller::new(router, aggregator, settings));

    let state = Arc::new(AppState::new(health_registry, controller));
    let app = create_router(state.clone());

    (app, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["router"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(Component::Router, "1 agents unhealthy")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // Degraded is still operational
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["router"]["message"], "1 agents unhealthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(Component::ControlLoop, "Control loop stopped")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Controller not yet initialized");
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_fleet_metrics() {
    let (app, state) = setup_test_app().await;
    state.metrics.record_cycle(true, 1.5);

    let (status, body) = get(app, "/metrics").await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("fleet_controller_cycles_total"));
    assert!(text.contains("fleet_router_call_attempts_total"));
}

#[tokio::test]
async fn test_agents_lists_registered_agents() {
    let (app, state) = setup_test_app().await;
    state
        .router
        .register(
            "k8s",
            AgentCategory::Orchestrator,
            "http://10.0.0.1:8765/mcp",
            "control-plane",
            JsonMap::new(),
        )
        .await;
    state
        .router
        .register(
            "worker-1",
            AgentCategory::NodeAgent,
            "http://10.0.0.11:8765/mcp",
            "worker-1",
            JsonMap::new(),
        )
        .await;

    let (status, agents) = get_json(app, "/agents").await;

    assert_eq!(status, StatusCode::OK);
    let agents = agents.as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0]["id"], "k8s");
    assert_eq!(agents[0]["category"], "k8s");
    assert_eq!(agents[1]["id"], "worker-1");
    assert_eq!(agents[1]["healthy"], true);
}

#[tokio::test]
async fn test_snapshot_with_empty_fleet() {
    let (app, _state) = setup_test_app().await;

    let (status, summary) = get_json(app, "/snapshot").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_agents"], 0);
    assert_eq!(summary["healthy_agents"], 0);
    assert!(summary.get("cluster").is_none());
}

#[tokio::test]
async fn test_cycles_lists_history() {
    let (app, state) = setup_test_app().await;

    let (_, empty) = get_json(app.clone(), "/cycles").await;
    assert_eq!(empty.as_array().unwrap().len(), 0);

    let first = state.controller.run_cycle(true).await;
    let second = state.controller.run_cycle(true).await;

    let (status, cycles) = get_json(app, "/cycles").await;

    assert_eq!(status, StatusCode::OK);
    let cycles = cycles.as_array().unwrap();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0]["cycle_id"], first.cycle_id.as_str());
    assert_eq!(cycles[1]["cycle_id"], second.cycle_id.as_str());
    assert_eq!(cycles[1]["success"], true);
    assert_eq!(cycles[1]["actions_planned"], 0);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = get(app, "/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
