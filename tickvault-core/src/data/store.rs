//! Dataset store — one Parquet file per `(symbol, frequency)`.
//!
//! Layout: `{root}/historical/{frequency}/{SYMBOL}.parquet`
//!
//! Features:
//! - Merge-on-save with last-write-wins per date, or full overwrite
//! - Atomic writes (write to .tmp, rename into place)
//! - Index resync after every successful save, under the series lock
//! - Files are self-describing and load without the index
//! - Corrupt files surface as `StoreError::Storage` and are left in place

use super::export::{render, ExportFormat};
use super::index::{scan_symbols, SeriesIndex};
use super::layout;
use super::locks;
use super::parquet_io::{read_dataset_file, write_dataset_file};
use crate::domain::{canonicalize, merge_records, validate_symbol, Frequency, Record, SeriesKey};
use crate::error::StoreError;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful `save` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveOutcome {
    /// Records in the dataset after the save.
    pub records: usize,
    /// Dates that were not stored before.
    pub added: usize,
    /// Dates whose stored record was replaced.
    pub replaced: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSaveReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// The dataset store. Shared across workers behind an `Arc`.
#[derive(Debug)]
pub struct DatasetStore {
    root: PathBuf,
    historical: PathBuf,
    index: Arc<SeriesIndex>,
}

impl DatasetStore {
    /// Open the store rooted at `root`, creating the directory tree and
    /// loading the series index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let historical = layout::historical_dir(&root);
        for frequency in Frequency::ALL {
            fs::create_dir_all(layout::frequency_dir(&historical, frequency))
                .map_err(|e| StoreError::storage("create store dirs", e))?;
        }
        let index = Arc::new(SeriesIndex::open(&historical)?);
        debug!(root = %root.display(), "dataset store opened");
        Ok(Self {
            root,
            historical,
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &Arc<SeriesIndex> {
        &self.index
    }

    pub fn dataset_path(&self, symbol: &str, frequency: Frequency) -> PathBuf {
        layout::dataset_path(&self.historical, symbol, frequency)
    }

    pub fn exists(&self, symbol: &str, frequency: Frequency) -> bool {
        validate_symbol(symbol).is_ok() && self.dataset_path(symbol, frequency).exists()
    }

    // ── Save ────────────────────────────────────────────────────────

    /// Persist `records` for `(symbol, frequency)`.
    ///
    /// With `overwrite == false` the records are merged into any stored
    /// dataset: union of dates, the incoming record wins on a shared date.
    /// With `overwrite == true` the stored dataset is replaced. Invalid input
    /// is rejected before anything is written.
    pub fn save(
        &self,
        symbol: &str,
        frequency: Frequency,
        records: &[Record],
        overwrite: bool,
    ) -> Result<SaveOutcome, StoreError> {
        self.save_with_source(symbol, frequency, records, overwrite, "save")
    }

    /// `save`, tagging the index entry's `source` metadata.
    pub fn save_with_source(
        &self,
        symbol: &str,
        frequency: Frequency,
        records: &[Record],
        overwrite: bool,
        source: &str,
    ) -> Result<SaveOutcome, StoreError> {
        validate_symbol(symbol)?;
        if records.is_empty() {
            return Err(StoreError::Validation(format!(
                "no records to save for {symbol}@{frequency}"
            )));
        }
        for record in records {
            record.validate()?;
        }
        let incoming = canonicalize(records.iter().cloned());

        let key = SeriesKey::new(symbol, frequency);
        let key_lock = self.index.key_lock(&key);
        let _guard = locks::lock(&key_lock);

        let path = self.dataset_path(symbol, frequency);
        let existing = if !overwrite && path.exists() {
            read_dataset_file(&path)?
        } else {
            Vec::new()
        };

        let previous: BTreeSet<NaiveDate> = existing.iter().map(|r| r.date).collect();
        let replaced = incoming.iter().filter(|r| previous.contains(&r.date)).count();
        let added = incoming.len() - replaced;

        let merged = merge_records(existing, &incoming);
        write_dataset_file(&path, &merged)?;
        let entry = self
            .index
            .upsert_locked(symbol, frequency, &merged, source)?;

        info!(
            symbol,
            %frequency,
            records = merged.len(),
            added,
            replaced,
            overwrite,
            "dataset saved"
        );
        Ok(SaveOutcome {
            records: merged.len(),
            added,
            replaced,
            fingerprint: entry.fingerprint,
        })
    }

    /// Save several symbols in parallel on a pool of `max_workers` threads.
    /// One symbol's failure is recorded and does not stop the others.
    pub fn bulk_save(
        &self,
        batch: &BTreeMap<String, Vec<Record>>,
        frequency: Frequency,
        max_workers: usize,
    ) -> BulkSaveReport {
        let save_one = |(symbol, records): (&String, &Vec<Record>)| {
            let result = self.save(symbol, frequency, records, false);
            (symbol.clone(), result)
        };

        let results: Vec<(String, Result<SaveOutcome, StoreError>)> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(max_workers.max(1))
                .build()
            {
                Ok(pool) => pool.install(|| batch.par_iter().map(save_one).collect()),
                Err(e) => {
                    warn!(error = %e, "bulk save pool unavailable, saving sequentially");
                    batch.iter().map(save_one).collect()
                }
            };

        let mut report = BulkSaveReport::default();
        for (symbol, result) in results {
            match result {
                Ok(_) => report.succeeded.push(symbol),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "bulk save failed for symbol");
                    report.failed.push((symbol, e.to_string()));
                }
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk save finished"
        );
        report
    }

    // ── Load ────────────────────────────────────────────────────────

    /// Load the stored dataset, optionally restricted to `[start, end]`
    /// inclusive. `Ok(None)` when nothing is stored for the key.
    pub fn load(
        &self,
        symbol: &str,
        frequency: Frequency,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        validate_symbol(symbol)?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(StoreError::Validation(format!(
                    "load window starts after it ends ({s} > {e})"
                )));
            }
        }

        let path = self.dataset_path(symbol, frequency);
        if !path.exists() {
            return Ok(None);
        }

        let mut records = read_dataset_file(&path)?;
        records.retain(|r| start.map_or(true, |s| r.date >= s) && end.map_or(true, |e| r.date <= e));
        debug!(symbol, %frequency, records = records.len(), "dataset loaded");
        Ok(Some(records))
    }

    /// Symbols with a dataset file, found by scanning the frequency directory.
    pub fn list_stored_symbols(&self, frequency: Frequency) -> Result<Vec<String>, StoreError> {
        scan_symbols(&self.historical, frequency)
    }

    // ── Delete / export ─────────────────────────────────────────────

    /// Remove the dataset file and its index entry. Returns whether anything
    /// was stored.
    pub fn delete(&self, symbol: &str, frequency: Frequency) -> Result<bool, StoreError> {
        validate_symbol(symbol)?;
        let key = SeriesKey::new(symbol, frequency);
        let key_lock = self.index.key_lock(&key);
        let _guard = locks::lock(&key_lock);

        let path = self.dataset_path(symbol, frequency);
        let had_file = path.exists();
        if had_file {
            fs::remove_file(&path).map_err(|e| StoreError::storage("delete dataset", e))?;
        }
        let had_entry = self.index.remove_locked(&key)?;
        if had_file || had_entry {
            info!(symbol, %frequency, "dataset deleted");
        }
        Ok(had_file || had_entry)
    }

    /// Write the stored dataset to `output` as CSV or JSON. Returns the
    /// number of records written.
    pub fn export(
        &self,
        symbol: &str,
        frequency: Frequency,
        format: ExportFormat,
        output: &Path,
    ) -> Result<usize, StoreError> {
        let records = self.load(symbol, frequency, None, None)?.ok_or_else(|| {
            StoreError::Validation(format!("nothing stored for {symbol}@{frequency}"))
        })?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::storage("create export dir", e))?;
        }
        fs::write(output, render(&records, format)?)
            .map_err(|e| StoreError::storage("write export", e))?;

        info!(symbol, %frequency, %format, records = records.len(), output = %output.display(), "dataset exported");
        Ok(records.len())
    }
}
