//! Tickvault Core — local storage for dated market series.
//!
//! This crate contains the storage half of the system:
//! - Domain types (frequency, record, date range, series key)
//! - Dataset store: one Parquet file per (symbol, frequency), merge-on-save
//! - Series index: per-series extent and fingerprint, atomic replacement,
//!   gap detection and integrity verification
//! - CSV/JSON import and export
//! - The fetch-collaborator trait with CSV-directory and synthetic fetchers

pub mod data;
pub mod domain;
pub mod error;
pub mod fingerprint;

pub use data::{
    Availability, DatasetStore, FetchError, IndexEntry, IntegrityReport, RowFetcher, SeriesIndex,
};
pub use domain::{DateRange, Frequency, Record, SeriesKey};
pub use error::StoreError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything workers share across threads is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<DatasetStore>();
        require_sync::<DatasetStore>();
        require_send::<SeriesIndex>();
        require_sync::<SeriesIndex>();
        require_send::<Record>();
        require_sync::<Record>();
        require_send::<IndexEntry>();
        require_sync::<IndexEntry>();
        require_send::<StoreError>();
        require_sync::<StoreError>();
        require_send::<FetchError>();
        require_sync::<FetchError>();

        require_send::<data::CsvDirFetcher>();
        require_sync::<data::CsvDirFetcher>();
        require_send::<data::SyntheticFetcher>();
        require_sync::<data::SyntheticFetcher>();
    }

    /// The fetch collaborator must be usable as a shared trait object.
    #[test]
    fn row_fetcher_is_object_safe() {
        fn _shared(f: std::sync::Arc<dyn RowFetcher>) -> std::sync::Arc<dyn RowFetcher> {
            f
        }
    }
}
