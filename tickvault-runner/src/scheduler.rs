//! Update scheduler — tiered, bounded-concurrency refresh of stored series.
//!
//! A run has four phases:
//! 1. Plan: classify the symbols (or treat all as `normal` under `force`)
//!    and keep the ones whose stored data is older than their tier allows.
//! 2. Estimate: cost each task from the size of its missing range.
//! 3. Order: priority weight descending, estimated duration ascending.
//! 4. Execute: submit in that order to a pool of `max_workers` threads; each
//!    task fetches its window and merges it into the store.
//!
//! Completion order is unconstrained. One task's failure never reaches its
//! siblings; everything ends up in the `BatchReport`.
//!
//! Each fetch runs on its own helper thread while the worker waits on it
//! against the task's deadline. A fetch that overruns is abandoned: the
//! worker moves on, the helper is detached and whatever it returns later is
//! dropped without touching the store.

use crate::classifier::ActivityClassifier;
use crate::config::SchedulerConfig;
use crate::report::{BatchReport, EstimateReport, TaskOutcome, TaskStatus, TierBreakdown};
use crate::tier::Tier;
use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tickvault_core::data::{FetchError, RowFetcher};
use tickvault_core::{DatasetStore, DateRange, Record, StoreError};
use tracing::{debug, error, info, warn};

/// Seconds per missing day in the duration estimate.
const SECS_PER_MISSING_DAY: f64 = 0.5;
const MIN_TASK_SECS: f64 = 0.5;
const MAX_TASK_SECS: f64 = 5.0;
/// How often a worker waiting on a fetch looks at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store failed: {0}")]
    Storage(#[from] StoreError),

    #[error("timed out after {elapsed_secs:.1}s (limit {limit_secs:.1}s)")]
    TimedOut { elapsed_secs: f64, limit_secs: f64 },

    #[error("cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// One scheduled refresh. Built per run and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateTask {
    pub symbol: String,
    pub tier: Tier,
    pub priority: u32,
    pub last_updated: Option<DateTime<Utc>>,
    pub estimated_secs: f64,
    pub staleness_interval_hours: i64,
    /// Window to fetch; `None` when the stored data already reaches `as_of`.
    pub fetch_window: Option<DateRange>,
}

/// Output of the planning phases.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulePlan {
    pub total_symbols: usize,
    pub tasks: Vec<UpdateTask>,
    pub skipped: Vec<String>,
    pub tiers: TierBreakdown,
}

/// Sort tasks by priority weight descending, then estimated duration
/// ascending. Stable, so equal tasks keep their input order.
pub fn order_tasks(tasks: &mut [UpdateTask]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.estimated_secs.total_cmp(&b.estimated_secs))
    });
}

/// Estimated seconds for a task with `missing_days` to fetch.
pub fn estimate_duration(missing_days: i64) -> f64 {
    (missing_days.max(0) as f64 * SECS_PER_MISSING_DAY).clamp(MIN_TASK_SECS, MAX_TASK_SECS)
}

pub struct UpdateScheduler {
    store: Arc<DatasetStore>,
    classifier: Arc<ActivityClassifier>,
    fetcher: Arc<dyn RowFetcher>,
    config: SchedulerConfig,
    as_of: Option<NaiveDate>,
}

impl UpdateScheduler {
    pub fn new(
        store: Arc<DatasetStore>,
        classifier: Arc<ActivityClassifier>,
        fetcher: Arc<dyn RowFetcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            fetcher,
            config,
            as_of: None,
        }
    }

    /// Fetch windows end at `as_of` instead of today.
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Local::now().date_naive())
    }

    // ── Planning ─────────────────────────────────────────────────────

    /// Phases 1–3: select, estimate and order tasks.
    pub fn plan(&self, symbols: &[String], force: bool) -> SchedulePlan {
        let symbols = dedup(symbols);
        let mut plan = SchedulePlan {
            total_symbols: symbols.len(),
            ..SchedulePlan::default()
        };

        let tiers: Vec<Tier> = if force {
            plan.tiers.normal = symbols.len();
            vec![Tier::Normal; symbols.len()]
        } else {
            let batch = self
                .classifier
                .classify_batch(&symbols, self.classifier.config().lookback_days);
            plan.tiers = TierBreakdown {
                active: batch.active.len(),
                normal: batch.normal.len(),
                inactive: batch.inactive.len(),
                unknown: batch.unknown.len(),
            };
            // Unscorable symbols (typically never stored) refresh as normal.
            symbols
                .iter()
                .map(|s| batch.tier_of(s).unwrap_or(Tier::Normal))
                .collect()
        };

        let now = Utc::now();
        for (symbol, tier) in symbols.into_iter().zip(tiers) {
            let availability = self
                .store
                .index()
                .get_availability(&symbol, self.config.frequency);
            let stale = force
                || match availability.last_updated.filter(|_| availability.available) {
                    None => true,
                    Some(at) => now - at >= tier.staleness_interval(),
                };
            if !stale {
                debug!(symbol = %symbol, tier = %tier, "fresh, skipping");
                plan.skipped.push(symbol);
                continue;
            }
            plan.tasks.push(self.build_task(symbol, tier, availability.last_updated, availability.end_date));
        }

        order_tasks(&mut plan.tasks);
        plan
    }

    fn build_task(
        &self,
        symbol: String,
        tier: Tier,
        last_updated: Option<DateTime<Utc>>,
        stored_end: Option<NaiveDate>,
    ) -> UpdateTask {
        let as_of = self.as_of();
        let history_start = as_of
            .checked_sub_days(Days::new(self.config.history_days.max(1) as u64))
            .unwrap_or(NaiveDate::MIN);

        // Missing days are measured from the last stored date to `as_of`.
        let probe_start = stored_end.map_or(history_start, |end| end.min(as_of));
        let missing_days = match self.store.index().get_missing_ranges(
            &symbol,
            self.config.frequency,
            probe_start,
            as_of,
        ) {
            Ok(ranges) => ranges.iter().map(DateRange::days).sum(),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "gap probe failed, assuming full window");
                (as_of - history_start).num_days() + 1
            }
        };

        let fetch_start = match stored_end {
            Some(end) => end.succ_opt().unwrap_or(end),
            None => history_start,
        };

        UpdateTask {
            symbol,
            tier,
            priority: tier.priority_weight(),
            last_updated,
            estimated_secs: estimate_duration(missing_days),
            staleness_interval_hours: tier.staleness_interval().num_hours(),
            fetch_window: DateRange::new(fetch_start, as_of),
        }
    }

    /// Dry run: phases 1–3 without executing anything.
    pub fn estimate(&self, symbols: &[String], max_workers: usize) -> EstimateReport {
        let plan = self.plan(symbols, false);
        let total_estimate: f64 = plan.tasks.iter().map(|t| t.estimated_secs).sum();
        let lanes = max_workers.max(1).min(plan.tasks.len());
        EstimateReport {
            total_tasks: plan.tasks.len(),
            skipped: plan.skipped.len(),
            total_estimate,
            parallel_estimate: if lanes == 0 {
                0.0
            } else {
                total_estimate / lanes as f64
            },
            max_workers,
        }
    }

    // ── Execution ────────────────────────────────────────────────────

    pub fn run(&self, symbols: &[String], force: bool, max_workers: usize) -> BatchReport {
        self.run_with_cancel(symbols, force, max_workers, None)
    }

    /// `run` with a run-level cancellation flag. Tasks that have not started
    /// when the flag is raised finish as `Cancelled`.
    pub fn run_with_cancel(
        &self,
        symbols: &[String],
        force: bool,
        max_workers: usize,
        cancel: Option<&AtomicBool>,
    ) -> BatchReport {
        let start = Instant::now();
        let plan = self.plan(symbols, force);
        let workers = max_workers.max(1);

        info!(
            symbols = plan.total_symbols,
            tasks = plan.tasks.len(),
            skipped = plan.skipped.len(),
            workers,
            force,
            "update run starting"
        );

        let outcomes = self.execute(&plan.tasks, workers, cancel);
        let report = BatchReport::from_outcomes(&plan, outcomes, start.elapsed().as_secs_f64());

        info!(
            successful = report.successful,
            failed = report.failed,
            cancelled = report.cancelled,
            duration_secs = report.duration_seconds,
            "update run finished"
        );
        report
    }

    /// Submit tasks in order to a bounded pool and collect outcomes in
    /// completion order.
    fn execute(
        &self,
        tasks: &[UpdateTask],
        workers: usize,
        cancel: Option<&AtomicBool>,
    ) -> Vec<TaskOutcome> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tickvault-worker-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "worker pool unavailable, running tasks inline");
                return tasks.iter().map(|t| self.run_task(t, cancel)).collect();
            }
        };

        let (tx, rx) = mpsc::channel::<TaskOutcome>();
        std::thread::scope(|ts| {
            ts.spawn(move || {
                pool.scope_fifo(|s| {
                    for task in tasks {
                        let tx = tx.clone();
                        s.spawn_fifo(move |_| {
                            let _ = tx.send(self.run_task(task, cancel));
                        });
                    }
                });
            });

            let total = tasks.len();
            rx.iter()
                .enumerate()
                .map(|(done, outcome)| {
                    debug!(
                        symbol = %outcome.symbol,
                        status = ?outcome.status,
                        done = done + 1,
                        total,
                        "task finished"
                    );
                    outcome
                })
                .collect()
        })
    }

    /// Run one task, converting panics into failures.
    fn run_task(&self, task: &UpdateTask, cancel: Option<&AtomicBool>) -> TaskOutcome {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| self.refresh(task, cancel, started)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(&*payload))));
        let elapsed_secs = started.elapsed().as_secs_f64();

        match result {
            Ok(records_fetched) => TaskOutcome {
                symbol: task.symbol.clone(),
                tier: task.tier,
                status: TaskStatus::Succeeded,
                records_fetched,
                error: None,
                elapsed_secs,
            },
            Err(e) => {
                let status = if matches!(e, TaskError::Cancelled) {
                    TaskStatus::Cancelled
                } else {
                    warn!(symbol = %task.symbol, tier = %task.tier, error = %e, "task failed");
                    TaskStatus::Failed
                };
                TaskOutcome {
                    symbol: task.symbol.clone(),
                    tier: task.tier,
                    status,
                    records_fetched: 0,
                    error: Some(e.to_string()),
                    elapsed_secs,
                }
            }
        }
    }

    /// Fetch the task's window and merge it into the store. Returns the
    /// number of rows fetched.
    fn refresh(
        &self,
        task: &UpdateTask,
        cancel: Option<&AtomicBool>,
        started: Instant,
    ) -> Result<usize, TaskError> {
        let cancelled = || cancel.is_some_and(|f| f.load(Ordering::Relaxed));
        if cancelled() {
            return Err(TaskError::Cancelled);
        }

        let Some(window) = task.fetch_window else {
            // Already current; nothing to fetch.
            return Ok(0);
        };
        let limit_secs = (task.estimated_secs * self.config.timeout_multiple)
            .max(self.config.min_task_timeout_secs);
        let rows = self.fetch_within(task, window, started, limit_secs, cancel)?;
        if cancelled() {
            return Err(TaskError::Cancelled);
        }
        if rows.is_empty() {
            return Ok(0);
        }

        self.store.save_with_source(
            &task.symbol,
            self.config.frequency,
            &rows,
            false,
            self.fetcher.name(),
        )?;
        Ok(rows.len())
    }

    /// Run the fetch on a helper thread and wait for it until `started +
    /// limit_secs`, polling `cancel` meanwhile. On expiry or cancellation the
    /// helper is left to finish on its own and its rows are discarded.
    fn fetch_within(
        &self,
        task: &UpdateTask,
        window: DateRange,
        started: Instant,
        limit_secs: f64,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<Record>, TaskError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let fetcher = Arc::clone(&self.fetcher);
        let symbol = task.symbol.clone();
        let frequency = self.config.frequency;
        let spawned = thread::Builder::new()
            .name(format!("tickvault-fetch-{}", task.symbol))
            .spawn(move || {
                let result =
                    catch_unwind(AssertUnwindSafe(|| fetcher.fetch_rows(&symbol, window, frequency)));
                // The receiver is gone when the task already timed out.
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            warn!(symbol = %task.symbol, error = %e, "fetch thread unavailable, fetching inline");
            return Ok(self.fetcher.fetch_rows(&task.symbol, window, frequency)?);
        }

        // An unrepresentable limit means no deadline; cancellation still applies.
        let deadline = Duration::try_from_secs_f64(limit_secs.max(0.0))
            .ok()
            .and_then(|limit| started.checked_add(limit));
        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(symbol = %task.symbol, limit_secs, "fetch overran its deadline, abandoning it");
                        return Err(TaskError::TimedOut {
                            elapsed_secs: started.elapsed().as_secs_f64(),
                            limit_secs,
                        });
                    }
                    (deadline - now).min(CANCEL_POLL)
                }
                None => CANCEL_POLL,
            };
            match rx.recv_timeout(wait) {
                Ok(Ok(fetched)) => return Ok(fetched?),
                Ok(Err(payload)) => return Err(TaskError::Panicked(panic_message(&*payload))),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                        return Err(TaskError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TaskError::Panicked("fetch thread exited without a result".into()))
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// First occurrence wins.
fn dedup(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(symbol: &str, tier: Tier, secs: f64) -> UpdateTask {
        UpdateTask {
            symbol: symbol.into(),
            tier,
            priority: tier.priority_weight(),
            last_updated: None,
            estimated_secs: secs,
            staleness_interval_hours: tier.staleness_interval().num_hours(),
            fetch_window: None,
        }
    }

    #[test]
    fn duration_estimate_is_clamped() {
        assert_eq!(estimate_duration(0), 0.5);
        assert_eq!(estimate_duration(1), 0.5);
        assert_eq!(estimate_duration(4), 2.0);
        assert_eq!(estimate_duration(365), 5.0);
    }

    #[test]
    fn ordering_priority_then_duration() {
        let mut tasks = vec![
            task("c", Tier::Inactive, 0.5),
            task("b2", Tier::Normal, 3.0),
            task("a", Tier::Active, 5.0),
            task("b1", Tier::Normal, 1.0),
        ];
        order_tasks(&mut tasks);
        let order: Vec<&str> = tasks.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(order, vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let symbols: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedup(&symbols), vec!["b", "a", "c"]);
    }
}
