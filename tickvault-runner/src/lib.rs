//! Tickvault Runner — activity classification and scheduled refreshes.
//!
//! This crate builds on `tickvault-core` to provide:
//! - TOML configuration with validated defaults
//! - Activity classifier: five weighted sub-scores and a refresh tier
//! - Update scheduler: staleness planning, cost estimates, priority order,
//!   bounded worker pool with per-task timeout and run cancellation
//! - Batch and estimate reports

pub mod classifier;
pub mod config;
pub mod report;
pub mod scheduler;
pub mod tier;

pub use classifier::{
    ActivityClassifier, ActivityScore, ActivitySignals, ClassificationBatch, ClassifyError,
    ShareRegistry, SubScores,
};
pub use config::{ClassifierConfig, ConfigError, SchedulerConfig, TickvaultConfig};
pub use report::{BatchReport, EstimateReport, TaskOutcome, TaskStatus, TierBreakdown};
pub use scheduler::{order_tasks, SchedulePlan, TaskError, UpdateScheduler, UpdateTask};
pub use tier::Tier;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn shared_services_are_send_sync() {
        assert_send::<ActivityClassifier>();
        assert_sync::<ActivityClassifier>();
        assert_send::<UpdateScheduler>();
        assert_sync::<UpdateScheduler>();
    }

    #[test]
    fn reports_are_send_sync() {
        assert_send::<BatchReport>();
        assert_sync::<BatchReport>();
        assert_send::<ClassificationBatch>();
        assert_sync::<ClassificationBatch>();
        assert_send::<TaskError>();
        assert_sync::<TaskError>();
    }
}
