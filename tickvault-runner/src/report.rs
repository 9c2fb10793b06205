//! Structured results of scheduler runs.

use crate::scheduler::SchedulePlan;
use crate::tier::Tier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub symbol: String,
    pub tier: Tier,
    pub status: TaskStatus,
    pub records_fetched: usize,
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

/// Symbols per classified tier. Under `force` every symbol counts as normal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub active: usize,
    pub normal: usize,
    pub inactive: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_symbols: usize,
    /// Symbols that were scheduled for a refresh.
    pub updated_symbols: usize,
    pub skipped_symbols: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub duration_seconds: f64,
    pub tier_breakdown: TierBreakdown,
    /// `updated_symbols / duration_seconds`.
    pub throughput: f64,
    /// In completion order.
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub(crate) fn from_outcomes(
        plan: &SchedulePlan,
        outcomes: Vec<TaskOutcome>,
        duration_seconds: f64,
    ) -> Self {
        let count = |status: TaskStatus| outcomes.iter().filter(|o| o.status == status).count();
        let updated_symbols = plan.tasks.len();
        Self {
            total_symbols: plan.total_symbols,
            updated_symbols,
            skipped_symbols: plan.skipped.len(),
            successful: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed),
            cancelled: count(TaskStatus::Cancelled),
            duration_seconds,
            tier_breakdown: plan.tiers,
            throughput: if duration_seconds > 0.0 {
                updated_symbols as f64 / duration_seconds
            } else {
                0.0
            },
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.status == TaskStatus::Failed)
    }
}

/// Dry-run capacity estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateReport {
    pub total_tasks: usize,
    pub skipped: usize,
    /// Sum of per-task estimates, in seconds.
    pub total_estimate: f64,
    /// `total_estimate / min(max_workers, total_tasks)`.
    pub parallel_estimate: f64,
    pub max_workers: usize,
}
