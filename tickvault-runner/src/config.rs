//! Runtime configuration, loaded from TOML.
//!
//! Every section and field is optional; missing values take the defaults
//! below.
//!
//! ```toml
//! [store]
//! root = "data"
//!
//! [classifier]
//! lookback_days = 5
//! min_coverage = 0.7
//! neutral_score = 50.0
//!
//! [classifier.weights]
//! turnover = 0.25
//! volume = 0.25
//! volatility = 0.25
//! news = 0.15
//! fund_flow = 0.10
//!
//! [classifier.thresholds]
//! active = 85.0
//! normal = 45.0
//!
//! [scheduler]
//! max_workers = 10
//! frequency = "daily"
//! history_days = 365
//! timeout_multiple = 4.0
//! min_task_timeout_secs = 10.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tickvault_core::Frequency;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickvaultConfig {
    pub store: StoreConfig,
    pub classifier: ClassifierConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

/// Sub-score weights. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub turnover: f64,
    pub volume: f64,
    pub volatility: f64,
    pub news: f64,
    pub fund_flow: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            turnover: 0.25,
            volume: 0.25,
            volatility: 0.25,
            news: 0.15,
            fund_flow: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.turnover + self.volume + self.volatility + self.news + self.fund_flow
    }

    fn all(&self) -> [f64; 5] {
        [self.turnover, self.volume, self.volatility, self.news, self.fund_flow]
    }
}

/// Tier boundaries: `total >= active` is active, `total >= normal` is normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub active: f64,
    pub normal: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            active: 85.0,
            normal: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub lookback_days: usize,
    /// Fraction of the lookback that must be present before sub-scores are
    /// computed at all.
    pub min_coverage: f64,
    /// Value used for news heat and fund flow when no signal is available.
    pub neutral_score: f64,
    pub weights: ScoreWeights,
    pub thresholds: TierThresholds,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            lookback_days: 5,
            min_coverage: 0.7,
            neutral_score: 50.0,
            weights: ScoreWeights::default(),
            thresholds: TierThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub frequency: Frequency,
    /// How far back the first fetch for a never-stored symbol reaches.
    pub history_days: i64,
    pub timeout_multiple: f64,
    pub min_task_timeout_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            frequency: Frequency::Daily,
            history_days: 365,
            timeout_multiple: 4.0,
            min_task_timeout_secs: 10.0,
        }
    }
}

impl TickvaultConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.classifier;
        if c.lookback_days == 0 {
            return Err(ConfigError::Invalid("classifier.lookback_days must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&c.min_coverage) {
            return Err(ConfigError::Invalid(format!(
                "classifier.min_coverage must be within [0, 1], got {}",
                c.min_coverage
            )));
        }
        if !(0.0..=100.0).contains(&c.neutral_score) {
            return Err(ConfigError::Invalid(format!(
                "classifier.neutral_score must be within [0, 100], got {}",
                c.neutral_score
            )));
        }
        if c.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid("classifier weights must be non-negative".into()));
        }
        if (c.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "classifier weights must sum to 1, got {}",
                c.weights.sum()
            )));
        }
        if c.thresholds.normal >= c.thresholds.active {
            return Err(ConfigError::Invalid(format!(
                "thresholds.normal ({}) must be below thresholds.active ({})",
                c.thresholds.normal, c.thresholds.active
            )));
        }

        let s = &self.scheduler;
        if s.max_workers == 0 {
            return Err(ConfigError::Invalid("scheduler.max_workers must be > 0".into()));
        }
        if s.history_days <= 0 {
            return Err(ConfigError::Invalid("scheduler.history_days must be > 0".into()));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(s.timeout_multiple) || !positive(s.min_task_timeout_secs) {
            return Err(ConfigError::Invalid(
                "scheduler timeouts must be positive".into(),
            ));
        }
        Ok(())
    }
}
