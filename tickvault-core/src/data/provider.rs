//! Fetch collaborator trait and its structured error type.
//!
//! The scheduler pulls new rows through `RowFetcher` and never knows where
//! they come from (a remote API, a directory of CSV exports, a synthetic
//! generator). Retry policy, if any, belongs inside an implementation.

use crate::domain::{DateRange, Frequency, Record};
use thiserror::Error;

/// Failures reported by a fetch collaborator.
///
/// The scheduler counts every variant as a task failure; it never retries.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by source (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("fetch failed: {0}")]
    Source(String),
}

/// Pulls rows for one series over an inclusive date window.
pub trait RowFetcher: Send + Sync {
    /// Human-readable name, recorded as the `source` of saved datasets.
    fn name(&self) -> &str;

    /// Rows for `symbol` dated within `range`. Implementations may return
    /// rows in any order; the store canonicalizes on save.
    fn fetch_rows(
        &self,
        symbol: &str,
        range: DateRange,
        frequency: Frequency,
    ) -> Result<Vec<Record>, FetchError>;
}
