//! Storage layer: Parquet datasets, the series index, import/export and
//! fetch collaborators.

pub mod csv_source;
pub mod export;
pub mod index;
pub mod layout;
pub mod locks;
pub mod parquet_io;
pub mod provider;
pub mod store;
pub mod synthetic;

pub use csv_source::CsvDirFetcher;
pub use export::{parse_csv_records, read_csv_file, records_to_csv, ExportFormat};
pub use index::{
    boundary_gaps, Availability, IndexEntry, IndexSummary, IntegrityIssue, IntegrityReport,
    IntegrityStatus, RebuildReport, RepairOutcome, SeriesIndex, VerifyOptions,
};
pub use provider::{FetchError, RowFetcher};
pub use store::{BulkSaveReport, DatasetStore, SaveOutcome};
pub use synthetic::SyntheticFetcher;
