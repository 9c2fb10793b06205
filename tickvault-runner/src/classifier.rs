//! Activity classifier — scores a symbol's recent trading activity and
//! assigns it a refresh tier.
//!
//! Five sub-scores, each in `[0, 100]`:
//! 1. **Turnover** — mean(volume / outstanding shares) × 100 as a percentage,
//!    then `min(100, pct × 10)`
//! 2. **Volume** — mean(volume × close), banded at 100K / 1M / 10M / 100M
//! 3. **Volatility** — mean(|daily % change|), banded at 0.5 / 1 / 3 / 5 %
//! 4. **News heat** and 5. **Fund flow** — from an `ActivitySignals`
//!    collaborator, neutral when absent
//!
//! The weighted total picks the tier. With less than `min_coverage` of the
//! lookback available every sub-score is 0 and `data_sufficient` is false.

use crate::config::{ClassifierConfig, ScoreWeights};
use crate::tier::Tier;
use chrono::{Days, Local, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tickvault_core::{DatasetStore, Frequency, Record, StoreError};
use tracing::{debug, warn};

/// Calendar days loaded beyond the lookback to cover weekends and holidays.
const CALENDAR_SLACK_DAYS: u64 = 10;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no stored daily data for {symbol}")]
    NoData { symbol: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outstanding share counts, for the turnover denominator.
pub trait ShareRegistry: Send + Sync {
    fn outstanding_shares(&self, symbol: &str) -> Option<f64>;
}

impl ShareRegistry for HashMap<String, f64> {
    fn outstanding_shares(&self, symbol: &str) -> Option<f64> {
        self.get(symbol).copied()
    }
}

/// News and fund-flow signals, already normalized to `[0, 100]`.
pub trait ActivitySignals: Send + Sync {
    fn news_heat(&self, symbol: &str) -> Option<f64>;
    fn fund_flow(&self, symbol: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub turnover: f64,
    pub volume: f64,
    pub volatility: f64,
    pub news_heat: f64,
    pub fund_flow: f64,
}

impl SubScores {
    /// Weighted sum, clamped to `[0, 100]`.
    pub fn weighted_total(&self, w: &ScoreWeights) -> f64 {
        let total = w.turnover * self.turnover
            + w.volume * self.volume
            + w.volatility * self.volatility
            + w.news * self.news_heat
            + w.fund_flow * self.fund_flow;
        if total.is_nan() {
            0.0
        } else {
            total.clamp(0.0, 100.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityScore {
    pub symbol: String,
    pub as_of: NaiveDate,
    /// Records found inside the lookback.
    pub observations: usize,
    /// False when too few observations were available; all sub-scores are
    /// then 0.
    pub data_sufficient: bool,
    /// Mean turnover in percent.
    pub turnover_rate: f64,
    pub sub_scores: SubScores,
    pub total: f64,
    pub tier: Tier,
}

/// Result of classifying a symbol set. Lists keep input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationBatch {
    pub active: Vec<String>,
    pub normal: Vec<String>,
    pub inactive: Vec<String>,
    pub unknown: Vec<String>,
    pub scores: Vec<ActivityScore>,
    /// Why each unknown symbol could not be scored.
    pub errors: Vec<(String, String)>,
}

impl ClassificationBatch {
    pub fn tier_of(&self, symbol: &str) -> Option<Tier> {
        self.scores.iter().find(|s| s.symbol == symbol).map(|s| s.tier)
    }
}

pub struct ActivityClassifier {
    store: Arc<DatasetStore>,
    shares: Option<Arc<dyn ShareRegistry>>,
    signals: Option<Arc<dyn ActivitySignals>>,
    config: ClassifierConfig,
    as_of: Option<NaiveDate>,
}

impl ActivityClassifier {
    pub fn new(store: Arc<DatasetStore>, config: ClassifierConfig) -> Self {
        Self {
            store,
            shares: None,
            signals: None,
            config,
            as_of: None,
        }
    }

    pub fn with_shares(mut self, shares: Arc<dyn ShareRegistry>) -> Self {
        self.shares = Some(shares);
        self
    }

    pub fn with_signals(mut self, signals: Arc<dyn ActivitySignals>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Score as of a fixed date instead of today.
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Score one symbol over its last `lookback_days` daily records.
    pub fn score(&self, symbol: &str, lookback_days: usize) -> Result<ActivityScore, ClassifyError> {
        let lookback = lookback_days.max(1);
        let as_of = self.as_of();
        let start = as_of
            .checked_sub_days(Days::new(lookback as u64 + CALENDAR_SLACK_DAYS))
            .unwrap_or(NaiveDate::MIN);

        let records = self
            .store
            .load(symbol, Frequency::Daily, Some(start), Some(as_of))?
            .ok_or_else(|| ClassifyError::NoData {
                symbol: symbol.to_string(),
            })?;

        // The record just before the window supplies the first prior close.
        let split = records.len().saturating_sub(lookback);
        let window = &records[split..];
        let prior = split.checked_sub(1).map(|i| &records[i]);

        let observations = window.len();
        let data_sufficient = observations as f64 >= lookback as f64 * self.config.min_coverage
            && observations > 0;

        let (sub_scores, turnover_rate) = if data_sufficient {
            self.sub_scores(symbol, window, prior)
        } else {
            (SubScores::default(), 0.0)
        };
        let total = sub_scores.weighted_total(&self.config.weights);
        let tier = Tier::from_score(total, &self.config.thresholds);

        debug!(
            symbol,
            observations,
            data_sufficient,
            total,
            tier = %tier,
            "activity scored"
        );
        Ok(ActivityScore {
            symbol: symbol.to_string(),
            as_of,
            observations,
            data_sufficient,
            turnover_rate,
            sub_scores,
            total,
            tier,
        })
    }

    fn sub_scores(&self, symbol: &str, window: &[Record], prior: Option<&Record>) -> (SubScores, f64) {
        let neutral = self.config.neutral_score;
        let signal = |v: Option<f64>| v.filter(|v| v.is_finite()).map_or(neutral, |v| v.clamp(0.0, 100.0));

        let shares = self
            .shares
            .as_ref()
            .and_then(|r| r.outstanding_shares(symbol))
            .filter(|s| s.is_finite() && *s > 0.0);
        let turnover_rate = turnover_pct(window, shares);

        let sub = SubScores {
            turnover: (turnover_rate * 10.0).min(100.0),
            volume: volume_score(mean(window.iter().map(Record::traded_value))),
            volatility: volatility_score(mean_abs_change_pct(window, prior)),
            news_heat: signal(self.signals.as_ref().and_then(|s| s.news_heat(symbol))),
            fund_flow: signal(self.signals.as_ref().and_then(|s| s.fund_flow(symbol))),
        };
        (sub, turnover_rate)
    }

    /// Score every symbol; a symbol that cannot be scored lands in `unknown`.
    pub fn classify_batch(&self, symbols: &[String], lookback_days: usize) -> ClassificationBatch {
        let results: Vec<(&String, Result<ActivityScore, ClassifyError>)> = symbols
            .par_iter()
            .map(|symbol| (symbol, self.score(symbol, lookback_days)))
            .collect();

        let mut batch = ClassificationBatch::default();
        for (symbol, result) in results {
            match result {
                Ok(score) => {
                    match score.tier {
                        Tier::Active => batch.active.push(symbol.clone()),
                        Tier::Normal => batch.normal.push(symbol.clone()),
                        Tier::Inactive => batch.inactive.push(symbol.clone()),
                    }
                    batch.scores.push(score);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "classification failed, marking unknown");
                    batch.unknown.push(symbol.clone());
                    batch.errors.push((symbol.clone(), e.to_string()));
                }
            }
        }
        batch
    }
}

// ── Scoring helpers ──────────────────────────────────────────────────

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Mean turnover in percent. Without a share count the denominator falls
/// back to `mean(volume) × 100`, i.e. a flat 1 % turnover.
fn turnover_pct(window: &[Record], shares: Option<f64>) -> f64 {
    let shares = match shares {
        Some(s) => s,
        None => {
            let avg_volume = mean(window.iter().map(|r| r.volume as f64));
            if avg_volume <= 0.0 {
                return 0.0;
            }
            avg_volume * 100.0
        }
    };
    mean(window.iter().map(|r| r.volume as f64 / shares)) * 100.0
}

/// Mean absolute daily % change. Uses a record's `change_pct` field when
/// present, otherwise the move from the previous close.
fn mean_abs_change_pct(window: &[Record], prior: Option<&Record>) -> f64 {
    let mut prev_close = prior.map(|r| r.close);
    let mut changes = Vec::with_capacity(window.len());
    for r in window {
        let change = r.change_pct().or_else(|| {
            prev_close
                .filter(|p| *p != 0.0)
                .map(|p| (r.close / p - 1.0) * 100.0)
        });
        if let Some(c) = change {
            changes.push(c.abs());
        }
        prev_close = Some(r.close);
    }
    mean(changes.into_iter())
}

/// Linear interpolation across score bands 0–20, 20–50, 50–80, 80–100,
/// saturating at 100 from `edges[3]`.
fn banded(value: f64, edges: [f64; 4]) -> f64 {
    const SCORES: [f64; 5] = [0.0, 20.0, 50.0, 80.0, 100.0];
    if value.is_nan() || value <= 0.0 {
        return 0.0;
    }
    let mut lower = 0.0;
    for (i, upper) in edges.into_iter().enumerate() {
        if value < upper {
            return SCORES[i] + (SCORES[i + 1] - SCORES[i]) * (value - lower) / (upper - lower);
        }
        lower = upper;
    }
    100.0
}

/// Traded value in currency units.
pub fn volume_score(avg_traded_value: f64) -> f64 {
    banded(avg_traded_value, [1e5, 1e6, 1e7, 1e8])
}

/// Mean absolute daily change in percent.
pub fn volatility_score(avg_abs_change_pct: f64) -> f64 {
    banded(avg_abs_change_pct, [0.5, 1.0, 3.0, 5.0])
}
