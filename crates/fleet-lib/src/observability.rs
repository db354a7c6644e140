//! Observability infrastructure for the fleet controller
//!
//! Provides:
//! - Prometheus metrics (call latency, retries, agent health, cache hits, cycles, actions)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for agent call latency (in seconds)
const CALL_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FleetMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct FleetMetricsInner {
    call_latency_seconds: Histogram,
    call_attempts: IntCounter,
    call_retries: IntCounter,
    call_failures: IntCounterVec,
    unhealthy_agents: IntGauge,
    snapshot_refreshes: IntCounter,
    snapshot_cache_hits: IntCounter,
    cycles: IntCounter,
    cycles_failed: IntCounter,
    cycle_duration_seconds: Gauge,
    actions_executed: IntCounterVec,
    actions_failed: IntCounterVec,
}

impl FleetMetricsInner {
    fn new() -> Self {
        Self {
            call_latency_seconds: register_histogram!(
                "fleet_router_call_latency_seconds",
                "Time from first attempt to success for routed tool calls",
                CALL_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register call_latency_seconds"),

            call_attempts: register_int_counter!(
                "fleet_router_call_attempts_total",
                "Network attempts made to agents"
            )
            .expect("Failed to register call_attempts"),

            call_retries: register_int_counter!(
                "fleet_router_call_retries_total",
                "Attempts that were followed by a backoff and retry"
            )
            .expect("Failed to register call_retries"),

            call_failures: register_int_counter_vec!(
                "fleet_router_call_failures_total",
                "Routed calls that returned a failed result",
                &["reason"]
            )
            .expect("Failed to register call_failures"),

            unhealthy_agents: register_int_gauge!(
                "fleet_router_unhealthy_agents",
                "Number of registered agents currently marked unhealthy"
            )
            .expect("Failed to register unhealthy_agents"),

            snapshot_refreshes: register_int_counter!(
                "fleet_aggregator_refreshes_total",
                "Full fan-out snapshot refreshes"
            )
            .expect("Failed to register snapshot_refreshes"),

            snapshot_cache_hits: register_int_counter!(
                "fleet_aggregator_cache_hits_total",
                "Snapshot requests served from the TTL cache"
            )
            .expect("Failed to register snapshot_cache_hits"),

            cycles: register_int_counter!(
                "fleet_controller_cycles_total",
                "Optimization cycles run"
            )
            .expect("Failed to register cycles"),

            cycles_failed: register_int_counter!(
                "fleet_controller_cycles_failed_total",
                "Optimization cycles that did not succeed"
            )
            .expect("Failed to register cycles_failed"),

            cycle_duration_seconds: register_gauge!(
                "fleet_controller_last_cycle_duration_seconds",
                "Wall time of the most recent optimization cycle"
            )
            .expect("Failed to register cycle_duration_seconds"),

            actions_executed: register_int_counter_vec!(
                "fleet_controller_actions_executed_total",
                "Actions executed by type",
                &["action"]
            )
            .expect("Failed to register actions_executed"),

            actions_failed: register_int_counter_vec!(
                "fleet_controller_actions_failed_total",
                "Actions that failed by type",
                &["action"]
            )
            .expect("Failed to register actions_failed"),
        }
    }
}

/// Fleet metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct FleetMetrics {
    _private: (),
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FleetMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FleetMetricsInner {
        GLOBAL_METRICS.get_or_init(FleetMetricsInner::new)
    }

    pub fn observe_call_latency(&self, duration_secs: f64) {
        self.inner().call_latency_seconds.observe(duration_secs);
    }

    pub fn inc_call_attempts(&self) {
        self.inner().call_attempts.inc();
    }

    pub fn inc_call_retries(&self) {
        self.inner().call_retries.inc();
    }

    /// Count a failed call, labelled by failure class
    pub fn inc_call_failures(&self, reason: &str) {
        self.inner().call_failures.with_label_values(&[reason]).inc();
    }

    pub fn set_unhealthy_agents(&self, count: i64) {
        self.inner().unhealthy_agents.set(count);
    }

    pub fn inc_snapshot_refreshes(&self) {
        self.inner().snapshot_refreshes.inc();
    }

    pub fn inc_snapshot_cache_hits(&self) {
        self.inner().snapshot_cache_hits.inc();
    }

    /// Record a finished cycle
    pub fn record_cycle(&self, success: bool, duration_secs: f64) {
        self.inner().cycles.inc();
        if !success {
            self.inner().cycles_failed.inc();
        }
        self.inner().cycle_duration_seconds.set(duration_secs);
    }

    /// Record an executed action
    pub fn record_action(&self, action: &str, success: bool) {
        self.inner().actions_executed.with_label_values(&[action]).inc();
        if !success {
            self.inner().actions_failed.with_label_values(&[action]).inc();
        }
    }

    pub fn call_attempts(&self) -> u64 {
        self.inner().call_attempts.get()
    }

    pub fn snapshot_cache_hits(&self) -> u64 {
        self.inner().snapshot_cache_hits.get()
    }

    pub fn cycles(&self) -> u64 {
        self.inner().cycles.get()
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for cycles, actions,
/// agent health transitions and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, agents: usize, policies: usize) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            agents = agents,
            policies = policies,
            "Fleet controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Fleet controller shutting down"
        );
    }

    /// Log an agent flipping between healthy and unhealthy
    pub fn log_agent_health(&self, agent_id: &str, healthy: bool) {
        if healthy {
            info!(
                event = "agent_health_changed",
                instance = %self.instance,
                agent_id = %agent_id,
                healthy = true,
                "Agent recovered"
            );
        } else {
            warn!(
                event = "agent_health_changed",
                instance = %self.instance,
                agent_id = %agent_id,
                healthy = false,
                "Agent marked unhealthy after exhausting retries"
            );
        }
    }

    pub fn log_snapshot(&self, total_agents: usize, healthy_agents: usize, elapsed_ms: u128) {
        info!(
            event = "snapshot_refreshed",
            instance = %self.instance,
            total_agents = total_agents,
            healthy_agents = healthy_agents,
            elapsed_ms = elapsed_ms,
            "Collected metrics from all agents"
        );
    }

    pub fn log_cycle_started(&self, cycle_id: &str, dry_run: bool) {
        info!(
            event = "cycle_started",
            instance = %self.instance,
            cycle_id = %cycle_id,
            dry_run = dry_run,
            "Starting optimization cycle"
        );
    }

    pub fn log_action(
        &self,
        cycle_id: &str,
        action: &str,
        target: &str,
        dry_run: bool,
        success: bool,
        error: Option<&str>,
    ) {
        if success {
            info!(
                event = "action_executed",
                instance = %self.instance,
                cycle_id = %cycle_id,
                action = %action,
                target = %target,
                dry_run = dry_run,
                "Action succeeded"
            );
        } else {
            warn!(
                event = "action_executed",
                instance = %self.instance,
                cycle_id = %cycle_id,
                action = %action,
                target = %target,
                dry_run = dry_run,
                error = ?error,
                "Action failed"
            );
        }
    }

    pub fn log_cycle_finished(
        &self,
        cycle_id: &str,
        success: bool,
        planned: usize,
        failed: usize,
        duration_secs: f64,
        error: Option<&str>,
    ) {
        if success {
            info!(
                event = "cycle_finished",
                instance = %self.instance,
                cycle_id = %cycle_id,
                success = true,
                actions_planned = planned,
                duration_secs = duration_secs,
                "Optimization cycle complete"
            );
        } else {
            warn!(
                event = "cycle_finished",
                instance = %self.instance,
                cycle_id = %cycle_id,
                success = false,
                actions_planned = planned,
                actions_failed = failed,
                duration_secs = duration_secs,
                error = ?error,
                "Optimization cycle finished with failures"
            );
        }
    }
}
