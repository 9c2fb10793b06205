//! Error taxonomy for the storage layer.
//!
//! Validation failures are rejected before anything touches disk, so a call
//! that returns `StoreError::Validation` is always a no-op. Storage failures
//! carry the I/O or Parquet message that caused them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown frequency '{0}' (expected daily, weekly or monthly)")]
    UnknownFrequency(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownFrequency(_))
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(format!("I/O: {e}"))
    }
}
