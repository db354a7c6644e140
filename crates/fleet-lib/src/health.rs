//! Component health for the fleet controller
//!
//! Backs the daemon's liveness and readiness endpoints. The control loop
//! reports cycle outcomes and agent health here after every cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Controller components that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Router,
    Aggregator,
    Controller,
    ControlLoop,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Router,
        Component::Aggregator,
        Component::Controller,
        Component::ControlLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Router => "router",
            Component::Aggregator => "aggregator",
            Component::Controller => "controller",
            Component::ControlLoop => "control_loop",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the fleet status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but agents or cycles it depends on are failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Degraded still serves traffic
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            status,
            message,
            since: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    ready: bool,
}

impl HealthState {
    fn overall(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Shared, cloneable health registry
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every component healthy
    pub async fn register_all(&self) {
        for component in Component::ALL {
            self.set(component, ComponentStatus::Healthy, None).await;
        }
    }

    /// Record a status. `since` only moves when the status changes.
    pub async fn set(
        &self,
        component: Component,
        status: ComponentStatus,
        message: Option<String>,
    ) {
        let mut state = self.state.write().await;
        let from = state.components.get(&component).map(|h| h.status);

        if from == Some(status) {
            if let Some(current) = state.components.get_mut(&component) {
                current.message = message;
                current.updated_at = Utc::now();
            }
            return;
        }

        log_transition(component, from, status, message.as_deref());
        state
            .components
            .insert(component, ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    pub async fn get(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    pub async fn status(&self, component: Component) -> Option<ComponentStatus> {
        self.get(component).await.map(|h| h.status)
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.overall(),
            components: state.components.clone(),
        }
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Controller not yet initialized".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(c, _)| c.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}

fn log_transition(
    component: Component,
    from: Option<ComponentStatus>,
    to: ComponentStatus,
    message: Option<&str>,
) {
    if to == ComponentStatus::Healthy {
        info!(component = %component, from = ?from, "Component healthy");
    } else {
        warn!(
            component = %component,
            from = ?from,
            to = ?to,
            message = ?message,
            "Component health changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), 4);
        assert_eq!(
            registry.status(Component::ControlLoop).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry
            .set_degraded(Component::Router, "2 agents unhealthy")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
        assert_eq!(
            health.components[&Component::Router].message.as_deref(),
            Some("2 agents unhealthy")
        );

        registry
            .set_unhealthy(Component::ControlLoop, "stopped")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_since_tracks_transitions_only() {
        let registry = HealthRegistry::new();
        registry
            .set_degraded(Component::Controller, "cycle a1b2c3d4 failed")
            .await;
        let first = registry.get(Component::Controller).await.unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        registry
            .set_degraded(Component::Controller, "cycle e5f6a7b8 failed")
            .await;
        let repeated = registry.get(Component::Controller).await.unwrap();

        assert_eq!(repeated.since, first.since);
        assert!(repeated.updated_at > first.updated_at);
        assert_eq!(repeated.message.as_deref(), Some("cycle e5f6a7b8 failed"));

        registry.set_healthy(Component::Controller).await;
        let recovered = registry.get(Component::Controller).await.unwrap();
        assert!(recovered.since > first.since);
        assert!(recovered.message.is_none());
    }

    #[tokio::test]
    async fn test_readiness_lifecycle() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Controller not yet initialized"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_degraded(Component::Controller, "cycle failed").await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(Component::ControlLoop, "down").await;
        registry.set_unhealthy(Component::Router, "down").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Unhealthy components: router, control_loop")
        );
    }

    #[test]
    fn test_health_json_shape() {
        let mut components = BTreeMap::new();
        components.insert(
            Component::ControlLoop,
            ComponentHealth::new(ComponentStatus::Unhealthy, Some("stopped".to_string())),
        );
        let response = HealthResponse {
            status: ComponentStatus::Unhealthy,
            components,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "unhealthy");
        assert_eq!(value["components"]["control_loop"]["message"], "stopped");
    }
}
