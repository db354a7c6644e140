//! HTTP API for health checks, Prometheus metrics and fleet status

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fleet_lib::{
    aggregator::Aggregator,
    controller::{Controller, CycleSummary},
    health::{ComponentStatus, HealthRegistry},
    observability::FleetMetrics,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: FleetMetrics,
    pub router: Arc<fleet_lib::Router>,
    pub aggregator: Arc<Aggregator>,
    pub controller: Arc<Controller>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, controller: Arc<Controller>) -> Self {
        Self {
            health_registry,
            metrics: FleetMetrics::new(),
            router: controller.router().clone(),
            aggregator: controller.aggregator().clone(),
            controller,
        }
    }
}

/// 200 while operational (degraded included), 503 once unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Registered agents in registration order
async fn agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.list(None, false).await)
}

/// Summary of the cached snapshot, refreshed when older than the TTL
async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.aggregator.summary().await)
}

/// Retained cycles, newest last
async fn cycles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summaries: Vec<CycleSummary> = state
        .controller
        .history()
        .await
        .iter()
        .map(|cycle| state.controller.cycle_summary(cycle))
        .collect();

    Json(summaries)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/agents", get(agents))
        .route("/snapshot", get(snapshot))
        .route("/cycles", get(cycles))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
