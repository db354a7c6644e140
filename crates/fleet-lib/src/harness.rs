//! Closed-loop scenario harness
//!
//! Runs a controller cycle under a scenario's policy set, then checks the
//! executed plan and the before/after metrics against expectations.

use crate::aggregator::{Aggregator, SnapshotSummary};
use crate::controller::{ActionKind, Controller, Policy, PolicyKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    Decrease,
    Increase,
    Equal,
}

/// A validation applied after the scenario's cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// At least `expected` actions were executed
    ActionCount { expected: usize },
    /// A summary metric moved in `direction` (missing metrics read as 0)
    MetricChange {
        metric: String,
        direction: MetricDirection,
    },
    /// Every agent considered after the cycle is healthy
    AgentHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: Check,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub policies: Vec<Policy>,
    pub expected_actions: Vec<ActionKind>,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycle_id: String,
    pub metrics_before: SnapshotSummary,
    pub metrics_after: SnapshotSummary,
    pub actions_taken: Vec<ActionKind>,
    pub checks: Vec<CheckOutcome>,
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,
    pub duration_seconds: f64,
    pub actions: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub results: Vec<ScenarioReport>,
}

pub struct Harness {
    aggregator: Arc<Aggregator>,
    controller: Arc<Controller>,
    results: Mutex<Vec<ScenarioResult>>,
}

impl Harness {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            aggregator: controller.aggregator().clone(),
            controller,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Run one scenario. The controller's own policies are restored afterwards.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        info!(scenario = %scenario.name, "Starting scenario");
        let started_at = Utc::now();
        let metrics_before = self.aggregator.summary().await;

        let policies = scenario
            .policies
            .iter()
            .cloned()
            .map(|mut policy| {
                if scenario.dry_run {
                    policy
                        .parameters
                        .insert("dry_run".to_string(), Value::Bool(true));
                }
                policy
            })
            .collect();

        let original = self.controller.replace_policies(policies).await;
        let cycle = self.controller.run_cycle(scenario.dry_run).await;
        self.controller.replace_policies(original).await;

        let actions_taken: Vec<ActionKind> = cycle
            .actions_executed
            .iter()
            .map(|r| r.action.kind)
            .collect();
        let metrics_after = self.aggregator.summary().await;

        let checks: Vec<CheckOutcome> = scenario
            .checks
            .iter()
            .map(|check| evaluate_check(check, &metrics_before, &metrics_after, &actions_taken))
            .collect();

        let actions_match = scenario
            .expected_actions
            .iter()
            .all(|kind| actions_taken.contains(kind));
        let passed = actions_match && cycle.error.is_none() && checks.iter().all(|c| c.passed);

        let result = ScenarioResult {
            scenario: scenario.name.clone(),
            passed,
            started_at,
            finished_at: Utc::now(),
            cycle_id: cycle.cycle_id,
            metrics_before,
            metrics_after,
            actions_taken,
            checks,
            error: cycle.error,
        };

        if result.passed {
            info!(scenario = %scenario.name, "Scenario passed");
        } else {
            warn!(scenario = %scenario.name, error = ?result.error, "Scenario failed");
        }

        self.results.lock().await.push(result.clone());
        result
    }

    /// Run `scenarios` in order and report over every result recorded so far
    pub async fn run_all(&self, scenarios: &[Scenario]) -> HarnessReport {
        for scenario in scenarios {
            self.run_scenario(scenario).await;
        }
        self.report().await
    }

    pub async fn report(&self) -> HarnessReport {
        let results = self.results.lock().await;
        let passed = results.iter().filter(|r| r.passed).count();
        let total = results.len();

        HarnessReport {
            total,
            passed,
            failed: total - passed,
            pass_rate: if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64
            },
            results: results
                .iter()
                .map(|r| ScenarioReport {
                    name: r.scenario.clone(),
                    passed: r.passed,
                    duration_seconds: r.duration_secs(),
                    actions: r.actions_taken.len(),
                    error: r.error.clone(),
                })
                .collect(),
        }
    }

    pub async fn results(&self) -> Vec<ScenarioResult> {
        self.results.lock().await.clone()
    }
}

fn evaluate_check(
    check: &Check,
    before: &SnapshotSummary,
    after: &SnapshotSummary,
    actions: &[ActionKind],
) -> CheckOutcome {
    let (passed, detail) = match check {
        Check::ActionCount { expected } => (
            actions.len() >= *expected,
            format!("Expected >= {} actions, got {}", expected, actions.len()),
        ),
        Check::MetricChange { metric, direction } => {
            let was = before.metric(metric).unwrap_or(0.0);
            let now = after.metric(metric).unwrap_or(0.0);
            let passed = match direction {
                MetricDirection::Decrease => now <= was,
                MetricDirection::Increase => now >= was,
                MetricDirection::Equal => now == was,
            };
            (passed, format!("{}: {} -> {}", metric, was, now))
        }
        Check::AgentHealth => (
            after.healthy_agents == after.total_agents,
            format!("{}/{} agents healthy", after.healthy_agents, after.total_agents),
        ),
    };

    CheckOutcome {
        check: check.clone(),
        passed,
        detail,
    }
}

/// Consolidation planning, power-save on idle nodes, and no-op when optimal
pub fn standard_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "consolidation_dry_run".to_string(),
            description: "Plan workload consolidation".to_string(),
            policies: vec![Policy::new("test_consolidate", PolicyKind::Consolidate)
                .with_condition("min_nodes", 5)
                .with_parameter("target_nodes", 5)
                .with_parameter("dry_run", true)],
            expected_actions: vec![ActionKind::ConsolidateWorkloads],
            checks: vec![Check::ActionCount { expected: 1 }, Check::AgentHealth],
            dry_run: true,
        },
        Scenario {
            name: "power_save_idle".to_string(),
            description: "Switch underutilized nodes to powersave".to_string(),
            policies: vec![Policy::new("test_power_save", PolicyKind::PowerSave)
                .with_condition("cpu_threshold", 50.0)
                .with_parameter("dry_run", true)],
            expected_actions: vec![ActionKind::SetGovernor],
            checks: vec![Check::AgentHealth],
            dry_run: true,
        },
        Scenario {
            name: "no_action_optimal".to_string(),
            description: "No action when the cluster is already small".to_string(),
            policies: vec![Policy::new("test_consolidate_noop", PolicyKind::Consolidate)
                .with_condition("min_nodes", 100)
                .with_parameter("target_nodes", 5)
                .with_parameter("dry_run", true)],
            expected_actions: vec![],
            checks: vec![Check::ActionCount { expected: 0 }, Check::AgentHealth],
            dry_run: true,
        },
    ]
}
