//! Record — one dated row of observations, and the date-window helpers
//! that go with it.

use crate::error::StoreError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column names every stored dataset carries, in on-disk order.
pub const BASE_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// A dated OHLCV row plus an open map of optional numeric fields
/// (`change_pct`, `amount`, `turnover`, ...).
///
/// Records within one dataset are unique by `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl Record {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: f64) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Daily percentage change when the source supplied one.
    pub fn change_pct(&self) -> Option<f64> {
        self.extra.get("change_pct").copied().filter(|v| v.is_finite())
    }

    /// Traded value proxy: `volume × close`.
    pub fn traded_value(&self) -> f64 {
        self.volume as f64 * self.close
    }

    /// Boundary validation applied by the store before any write.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(StoreError::Validation(format!(
                    "record {} has non-finite {name}",
                    self.date
                )));
            }
        }
        for (key, value) in &self.extra {
            if key.is_empty() || BASE_COLUMNS.contains(&key.as_str()) {
                return Err(StoreError::Validation(format!(
                    "record {} has invalid extension field '{key}'",
                    self.date
                )));
            }
            if !value.is_finite() {
                return Err(StoreError::Validation(format!(
                    "record {} has non-finite extension field '{key}'",
                    self.date
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive calendar window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Symbols become file names, so anything that could escape the frequency
/// directory is rejected.
pub fn validate_symbol(symbol: &str) -> Result<(), StoreError> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation("symbol must not be empty".into()));
    }
    if trimmed != symbol
        || symbol.contains(['/', '\\'])
        || symbol.starts_with('.')
        || symbol.chars().any(char::is_control)
    {
        return Err(StoreError::Validation(format!(
            "symbol '{symbol}' is not a valid file name"
        )));
    }
    Ok(())
}

/// Sort ascending by date and collapse duplicate dates, keeping the record
/// that appeared last.
pub fn canonicalize(records: impl IntoIterator<Item = Record>) -> Vec<Record> {
    let mut by_date: BTreeMap<NaiveDate, Record> = BTreeMap::new();
    for record in records {
        by_date.insert(record.date, record);
    }
    by_date.into_values().collect()
}

/// Merge `incoming` over `existing`: union of dates, `incoming` wins on overlap.
pub fn merge_records(existing: Vec<Record>, incoming: &[Record]) -> Vec<Record> {
    canonicalize(existing.into_iter().chain(incoming.iter().cloned()))
}
