//! Fleet optimization core
//!
//! This crate provides the core functionality for:
//! - Agent registry and tool-call routing with retry and health tracking
//! - Parallel metrics aggregation with snapshot caching
//! - Policy evaluation, action execution and cycle auditing
//! - Closed-loop scenario validation
//! - Health checks and observability

pub mod aggregator;
pub mod controller;
pub mod harness;
pub mod health;
pub mod models;
pub mod observability;
pub mod router;

#[cfg(test)]
mod test_support;

pub use aggregator::{Aggregator, AggregatorConfig, Snapshot, SnapshotSummary};
pub use controller::{
    Action, ActionKind, ActionResult, ControlLoop, ControlLoopBuilder, Controller,
    ControllerSettings, Cycle, CycleSummary, Policy, PolicyKind,
};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{FleetMetrics, StructuredLogger};
pub use router::{Router, RouterConfig, RouterError};
