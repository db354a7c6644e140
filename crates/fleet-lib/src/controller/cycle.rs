//! Optimization cycle records

use super::action::{Action, ActionResult};
use crate::aggregator::SnapshotSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit record of one collect, evaluate, execute, re-collect run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub cycle_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metrics_before: Option<SnapshotSummary>,
    pub metrics_after: Option<SnapshotSummary>,
    pub policies_evaluated: Vec<String>,
    pub actions_planned: Vec<Action>,
    pub actions_executed: Vec<ActionResult>,
    pub success: bool,
    pub error: Option<String>,
}

impl Cycle {
    pub(crate) fn start(dry_run: bool) -> Self {
        let mut cycle_id = uuid::Uuid::new_v4().simple().to_string();
        cycle_id.truncate(8);

        Self {
            cycle_id,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            metrics_before: None,
            metrics_after: None,
            policies_evaluated: Vec::new(),
            actions_planned: Vec::new(),
            actions_executed: Vec::new(),
            success: false,
            error: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    pub fn succeeded_actions(&self) -> usize {
        self.actions_executed.iter().filter(|r| r.success).count()
    }

    pub fn failed_actions(&self) -> usize {
        self.actions_executed.len() - self.succeeded_actions()
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            cycle_id: self.cycle_id.clone(),
            success: self.success,
            dry_run: self.dry_run,
            started_at: self.started_at,
            duration_seconds: (self.duration_secs() * 100.0).round() / 100.0,
            policies_evaluated: self.policies_evaluated.len(),
            actions_planned: self.actions_planned.len(),
            actions_executed: self.actions_executed.len(),
            actions_succeeded: self.succeeded_actions(),
            actions_failed: self.failed_actions(),
            error: self.error.clone(),
        }
    }
}

/// Counts-only view of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub success: bool,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub policies_evaluated: usize,
    pub actions_planned: usize,
    pub actions_executed: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub error: Option<String>,
}
