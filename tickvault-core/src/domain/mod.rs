//! Domain types shared by the store, the index and the scheduler.

pub mod frequency;
pub mod record;

pub use frequency::Frequency;
pub use record::{canonicalize, merge_records, validate_symbol, DateRange, Record, BASE_COLUMNS};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one dataset: `(symbol, frequency)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub frequency: Frequency,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            symbol: symbol.into(),
            frequency,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.frequency)
    }
}
