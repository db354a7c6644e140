//! Closed-loop optimization controller
//!
//! Holds the policy set, turns snapshots into an ordered action plan,
//! executes plans through the router and keeps an audit history of
//! every cycle.

mod action;
mod cycle;
mod error;
mod r#loop;
mod policy;


pub use action::{Action, ActionKind, ActionResult, CLUSTER_TARGET};
pub use cycle::{Cycle, CycleSummary};
pub use error::ControllerError;
pub use policy::{Policy, PolicyKind};
pub use r#loop::{ControlLoop, ControlLoopBuilder, ControlLoopConfig};

use crate::aggregator::{Aggregator, Snapshot};
use crate::models::{AgentCategory, AgentRecord, CallResult, JsonMap};
use crate::observability::{FleetMetrics, StructuredLogger};
use crate::router::Router;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Orchestrator tool that packs pods onto fewer nodes
pub const CONSOLIDATE_TOOL: &str = "consolidate_workloads";

/// Node tool that switches the CPU frequency governor
pub const SET_GOVERNOR_TOOL: &str = "set_cpu_governor";

/// Orchestrator tool that evicts all pods from a node
pub const DRAIN_NODE_TOOL: &str = "drain_node";

/// Orchestrator tool that cordons or uncordons a node
pub const SET_SCHEDULABLE_TOOL: &str = "set_node_schedulable";

/// Tunables for the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Pause between executing the plan and re-collecting (default: 1 second)
    pub settle_delay: Duration,
    /// Maximum cycles kept in history; `None` keeps all of them
    pub history_limit: Option<usize>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            history_limit: None,
        }
    }
}

/// Evaluates policies and executes the resulting actions
pub struct Controller {
    router: Arc<Router>,
    aggregator: Arc<Aggregator>,
    settings: ControllerSettings,
    policies: RwLock<Vec<Policy>>,
    history: RwLock<VecDeque<Cycle>>,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl Controller {
    pub fn new(
        router: Arc<Router>,
        aggregator: Arc<Aggregator>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            router,
            aggregator,
            settings,
            policies: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("controller"),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Add a policy and re-sort the set by descending priority.
    /// Equal priorities keep insertion order.
    pub async fn add_policy(&self, policy: Policy) {
        info!(policy = %policy.name, priority = policy.priority, "Added policy");
        let mut policies = self.policies.write().await;
        policies.push(policy);
        sort_by_priority(&mut policies);
    }

    /// Remove every policy called `name`. Returns whether any was removed.
    pub async fn remove_policy(&self, name: &str) -> bool {
        let mut policies = self.policies.write().await;
        let before = policies.len();
        policies.retain(|p| p.name != name);
        policies.len() != before
    }

    /// Enable or disable the first policy called `name`
    pub async fn enable_policy(&self, name: &str, enabled: bool) -> bool {
        let mut policies = self.policies.write().await;
        match policies.iter_mut().find(|p| p.name == name) {
            Some(policy) => {
                policy.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Current policy set, highest priority first
    pub async fn policies(&self) -> Vec<Policy> {
        self.policies.read().await.clone()
    }

    /// Swap the whole policy set, returning the previous one
    pub async fn replace_policies(&self, replacement: Vec<Policy>) -> Vec<Policy> {
        let mut replacement = replacement;
        sort_by_priority(&mut replacement);
        std::mem::replace(&mut *self.policies.write().await, replacement)
    }

    /// Evaluate every enabled policy against `snapshot`.
    ///
    /// Policies run in priority order; the combined plan is then sorted by
    /// the proposing policy's priority, ties keeping evaluation order.
    pub async fn evaluate(&self, snapshot: &Snapshot) -> Vec<Action> {
        let mut policies = self.policies().await;
        // Re-sorted here too so direct priority edits can never desync the order
        sort_by_priority(&mut policies);

        let mut actions: Vec<Action> = policies
            .iter()
            .filter(|p| p.enabled)
            .flat_map(|p| {
                let proposed = p.evaluate(snapshot);
                debug!(policy = %p.name, actions = proposed.len(), "Evaluated policy");
                proposed
            })
            .collect();

        actions.sort_by_key(|a| Reverse(a.priority));
        actions
    }

    /// Execute one action. Never fails: faults become a failed result.
    pub async fn execute(&self, action: &Action) -> ActionResult {
        let start = Instant::now();
        info!(
            action = %action.kind,
            target = %action.target,
            dry_run = action.dry_run,
            "Executing action"
        );

        let outcome = AssertUnwindSafe(self.dispatch(action))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ControllerError::Panicked(panic_message(panic))));

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let (success, result, error) = match outcome {
            Ok(payload) => (true, Some(payload), None),
            Err(err) => (false, None, Some(err.to_string())),
        };

        ActionResult {
            action: action.clone(),
            success,
            result,
            error,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    async fn dispatch(&self, action: &Action) -> Result<Value, ControllerError> {
        let mut args = JsonMap::new();

        match action.kind {
            ActionKind::ConsolidateWorkloads => {
                let orchestrator = self.orchestrator().await?;
                args.extend(action.parameters.clone());
                args.insert("dry_run".to_string(), Value::Bool(action.dry_run));
                self.call(&orchestrator.id, CONSOLIDATE_TOOL, args).await
            }
            ActionKind::SetGovernor => {
                args.extend(action.parameters.clone());
                args.insert("dry_run".to_string(), Value::Bool(action.dry_run));
                self.call(&action.target, SET_GOVERNOR_TOOL, args).await
            }
            ActionKind::DrainNode => {
                let orchestrator = self.orchestrator().await?;
                args.insert("node_name".to_string(), Value::from(action.target.clone()));
                args.extend(action.parameters.clone());
                args.insert("dry_run".to_string(), Value::Bool(action.dry_run));
                self.call(&orchestrator.id, DRAIN_NODE_TOOL, args).await
            }
            ActionKind::CordonNode | ActionKind::UncordonNode => {
                let orchestrator = self.orchestrator().await?;
                args.insert("node_name".to_string(), Value::from(action.target.clone()));
                args.insert(
                    "schedulable".to_string(),
                    Value::Bool(action.kind == ActionKind::UncordonNode),
                );
                args.insert("dry_run".to_string(), Value::Bool(action.dry_run));
                self.call(&orchestrator.id, SET_SCHEDULABLE_TOOL, args).await
            }
            ActionKind::SetPowerCap => Err(ControllerError::Unsupported(action.kind)),
        }
    }

    async fn orchestrator(&self) -> Result<AgentRecord, ControllerError> {
        self.router
            .list(Some(AgentCategory::Orchestrator), false)
            .await
            .into_iter()
            .next()
            .ok_or(ControllerError::NoOrchestrator)
    }

    /// Route a call and treat an `error` member in its payload as failure
    async fn call(
        &self,
        target: &str,
        tool: &str,
        args: JsonMap,
    ) -> Result<Value, ControllerError> {
        let CallResult {
            success,
            result,
            error,
            ..
        } = self.router.invoke(target, tool, args).await;

        if !success {
            return Err(ControllerError::Call(
                error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let payload = result.unwrap_or_else(|| Value::Object(JsonMap::new()));
        if let Some(reported) = payload.get("error") {
            let message = match reported {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(ControllerError::Call(message));
        }

        Ok(payload)
    }

    /// Run one full cycle: collect, evaluate, execute in order, settle, re-collect.
    ///
    /// When `dry_run` is set every planned action is forced to dry-run.
    /// Always returns a finished cycle, also when the cycle body panics.
    pub async fn run_cycle(&self, dry_run: bool) -> Cycle {
        let start = Instant::now();
        let mut cycle = Cycle::start(dry_run);
        self.logger.log_cycle_started(&cycle.cycle_id, dry_run);

        let outcome = AssertUnwindSafe(self.run_cycle_body(&mut cycle, dry_run))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            let message = panic_message(panic);
            error!(cycle_id = %cycle.cycle_id, error = %message, "Optimization cycle failed");
            cycle.success = false;
            cycle.error = Some(message);
        }

        cycle.finished_at = Some(Utc::now());

        self.metrics
            .record_cycle(cycle.success, start.elapsed().as_secs_f64());
        self.logger.log_cycle_finished(
            &cycle.cycle_id,
            cycle.success,
            cycle.actions_planned.len(),
            cycle.failed_actions(),
            cycle.duration_secs(),
            cycle.error.as_deref(),
        );

        self.record(cycle.clone()).await;
        cycle
    }

    async fn run_cycle_body(&self, cycle: &mut Cycle, dry_run: bool) {
        let before = self.aggregator.collect_all(true).await;
        cycle.metrics_before = Some(before.summary());

        let policies = self.policies().await;
        cycle.policies_evaluated = policies
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.clone())
            .collect();

        let mut actions = self.evaluate(&before).await;
        if dry_run {
            for action in &mut actions {
                action.dry_run = true;
            }
        }
        cycle.actions_planned = actions;
        info!(cycle_id = %cycle.cycle_id, actions = cycle.actions_planned.len(), "Planned actions");

        // Sequential: later actions may depend on earlier ones
        for action in &cycle.actions_planned {
            let result = self.execute(action).await;
            self.metrics.record_action(action.kind.as_str(), result.success);
            self.logger.log_action(
                &cycle.cycle_id,
                action.kind.as_str(),
                &action.target,
                action.dry_run,
                result.success,
                result.error.as_deref(),
            );
            cycle.actions_executed.push(result);
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        let after = self.aggregator.collect_all(true).await;
        cycle.metrics_after = Some(after.summary());

        cycle.success = cycle.actions_executed.iter().all(|r| r.success);
    }

    async fn record(&self, cycle: Cycle) {
        let mut history = self.history.write().await;
        history.push_back(cycle);
        if let Some(limit) = self.settings.history_limit {
            while history.len() > limit {
                history.pop_front();
            }
        }
    }

    /// All retained cycles, oldest first
    pub async fn history(&self) -> Vec<Cycle> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn last_cycle(&self) -> Option<Cycle> {
        self.history.read().await.back().cloned()
    }

    pub fn cycle_summary(&self, cycle: &Cycle) -> CycleSummary {
        cycle.summary()
    }
}

fn sort_by_priority(policies: &mut [Policy]) {
    policies.sort_by_key(|p| Reverse(p.priority));
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
