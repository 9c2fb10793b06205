//! Series index — per-`(symbol, frequency)` metadata kept next to the datasets.
//!
//! Backing file: `{root}/historical/index.db`, an embedded SQLite database
//! with one row per series.
//!
//! The index is a cache over the dataset files. Entries are derived from the
//! persisted records (date range, count, fingerprint) and replaced wholesale
//! after every save; they are never patched field by field. A replacement is
//! a single `INSERT OR REPLACE` of that series' row, and the in-memory view
//! is updated only after the statement committed, so readers see either the
//! old entry or the new one.
//!
//! Known limitation: gap detection compares the requested window against
//! the stored `[start_date, end_date]` only. Holes inside the covered range
//! are not reported; `verify_integrity` with contiguity checking is the
//! only place they surface.

use super::layout;
use super::locks::{self, KeyLocks};
use super::parquet_io::read_dataset_file;
use crate::domain::{canonicalize, DateRange, Frequency, Record, SeriesKey, BASE_COLUMNS};
use crate::error::StoreError;
use crate::fingerprint::fingerprint_canonical;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS series_index (
        symbol       TEXT    NOT NULL,
        frequency    TEXT    NOT NULL,
        start_date   TEXT    NOT NULL,
        end_date     TEXT    NOT NULL,
        record_count INTEGER NOT NULL,
        file_path    TEXT    NOT NULL,
        last_updated TEXT    NOT NULL,
        fingerprint  TEXT    NOT NULL,
        metadata     TEXT    NOT NULL DEFAULT '{}',
        PRIMARY KEY (symbol, frequency)
    );
"#;

const SELECT_ENTRIES: &str = "SELECT symbol, frequency, start_date, end_date, record_count, \
     file_path, last_updated, fingerprint, metadata FROM series_index";

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO series_index \
     (symbol, frequency, start_date, end_date, record_count, file_path, last_updated, fingerprint, metadata) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Authoritative metadata for one stored dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub symbol: String,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub record_count: usize,
    pub file_path: PathBuf,
    pub last_updated: DateTime<Utc>,
    pub fingerprint: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl IndexEntry {
    /// Derive an entry from dataset content, stamped with `last_updated`.
    pub fn from_dataset(
        symbol: &str,
        frequency: Frequency,
        file_path: PathBuf,
        records: &[Record],
        source: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let canonical = canonicalize(records.iter().cloned());
        let (first, last) = match (canonical.first(), canonical.last()) {
            (Some(first), Some(last)) => (first.date, last.date),
            _ => {
                return Err(StoreError::Validation(format!(
                    "cannot index an empty dataset for {symbol}@{frequency}"
                )))
            }
        };

        let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        let extras: BTreeSet<&String> = canonical.iter().flat_map(|r| r.extra.keys()).collect();
        columns.extend(extras.into_iter().cloned());

        let mut metadata = BTreeMap::new();
        metadata.insert("columns".to_string(), serde_json::json!(columns));
        metadata.insert("source".to_string(), serde_json::json!(source));

        Ok(Self {
            symbol: symbol.to_string(),
            frequency,
            start_date: first,
            end_date: last,
            record_count: canonical.len(),
            file_path,
            last_updated,
            fingerprint: fingerprint_canonical(&canonical)?,
            metadata,
        })
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.frequency)
    }

    pub fn date_range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Answer to "what do we have for this series?".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub record_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Availability {
    fn missing() -> Self {
        Self {
            available: false,
            start_date: None,
            end_date: None,
            record_count: 0,
            last_updated: None,
        }
    }
}

impl From<&IndexEntry> for Availability {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            available: true,
            start_date: Some(entry.start_date),
            end_date: Some(entry.end_date),
            record_count: entry.record_count,
            last_updated: Some(entry.last_updated),
        }
    }
}

/// Aggregate over every entry of one frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub frequency: Frequency,
    pub total_symbols: usize,
    pub total_records: usize,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
}

/// A single disagreement between an entry and its dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    MissingEntry,
    MissingFile { path: PathBuf },
    Unreadable { reason: String },
    EmptyDataset,
    CountMismatch { expected: usize, actual: usize },
    DateRangeMismatch { expected: DateRange, actual: DateRange },
    FingerprintMismatch { expected: String, actual: String },
    Unordered,
    NonContiguous { expected_days: i64, actual_records: usize },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEntry => write!(f, "no index entry"),
            Self::MissingFile { path } => write!(f, "dataset file missing: {}", path.display()),
            Self::Unreadable { reason } => write!(f, "dataset unreadable: {reason}"),
            Self::EmptyDataset => write!(f, "dataset is empty"),
            Self::CountMismatch { expected, actual } => {
                write!(f, "record count mismatch: index {expected}, file {actual}")
            }
            Self::DateRangeMismatch { expected, actual } => {
                write!(f, "date range mismatch: index {expected}, file {actual}")
            }
            Self::FingerprintMismatch { .. } => write!(f, "fingerprint mismatch"),
            Self::Unordered => write!(f, "records are not strictly ascending by date"),
            Self::NonContiguous {
                expected_days,
                actual_records,
            } => write!(
                f,
                "series not contiguous: {expected_days} calendar days, {actual_records} records"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub symbol: String,
    pub frequency: Frequency,
    pub status: IntegrityStatus,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.status == IntegrityStatus::Passed
    }
}

/// Optional checks for `verify_integrity_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Require one record per calendar day on daily series. Trading
    /// calendars skip weekends and holidays, so this is off by default.
    pub check_contiguity: bool,
}

/// Result of an explicit single-entry repair.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    Rebuilt(IndexEntry),
    Removed,
    NothingStored,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildReport {
    pub rebuilt: usize,
    pub removed: usize,
    pub failed: Vec<(SeriesKey, String)>,
}

/// The series index.
///
/// Queries are answered from an in-memory copy of the table; writes go to
/// SQLite first and are mirrored into memory once committed.
#[derive(Debug)]
pub struct SeriesIndex {
    historical: PathBuf,
    path: PathBuf,
    conn: Mutex<Connection>,
    entries: RwLock<BTreeMap<SeriesKey, IndexEntry>>,
    key_locks: KeyLocks,
}

impl SeriesIndex {
    /// Open (or create) the index under `{historical}/index.db`.
    ///
    /// A database that is corrupt or holds undecodable rows is quarantined
    /// as `index.db.quarantined-{timestamp}` and the index starts empty;
    /// `rebuild` restores it from the dataset files.
    pub fn open(historical: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let historical = historical.into();
        fs::create_dir_all(&historical)
            .map_err(|e| StoreError::storage("create historical dir", e))?;
        let path = layout::index_path(&historical);

        let (conn, entries) = match open_database(&path) {
            Ok(opened) => opened,
            Err(e) if is_corruption(&e) => {
                let quarantined = quarantine(&path)?;
                warn!(
                    path = %path.display(),
                    quarantined = %quarantined.display(),
                    error = %e,
                    "quarantined unreadable series index; run a rebuild to restore it"
                );
                open_database(&path).map_err(|e| StoreError::storage("open series index", e))?
            }
            Err(e) => return Err(StoreError::storage("open series index", e)),
        };

        debug!(entries = entries.len(), path = %path.display(), "series index opened");
        Ok(Self {
            historical,
            path,
            conn: Mutex::new(conn),
            entries: RwLock::new(entries),
            key_locks: KeyLocks::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn historical_dir(&self) -> &Path {
        &self.historical
    }

    pub fn len(&self) -> usize {
        locks::read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mutex serializing writes to one series. The dataset store holds it
    /// across its read-merge-write-upsert sequence.
    pub fn key_lock(&self, key: &SeriesKey) -> Arc<Mutex<()>> {
        self.key_locks.lock_for(key)
    }

    pub fn dataset_path(&self, symbol: &str, frequency: Frequency) -> PathBuf {
        layout::dataset_path(&self.historical, symbol, frequency)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Recompute the entry for `(symbol, frequency)` from `records` and
    /// replace the stored one.
    pub fn upsert_entry(
        &self,
        symbol: &str,
        frequency: Frequency,
        records: &[Record],
    ) -> Result<IndexEntry, StoreError> {
        let key = SeriesKey::new(symbol, frequency);
        let key_lock = self.key_lock(&key);
        let _guard = locks::lock(&key_lock);
        self.upsert_locked(symbol, frequency, records, "upsert")
    }

    /// Same as `upsert_entry`; the caller already holds the key lock.
    pub(crate) fn upsert_locked(
        &self,
        symbol: &str,
        frequency: Frequency,
        records: &[Record],
        source: &str,
    ) -> Result<IndexEntry, StoreError> {
        self.replace_locked(symbol, frequency, records, source, Utc::now())
    }

    fn replace_locked(
        &self,
        symbol: &str,
        frequency: Frequency,
        records: &[Record],
        source: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<IndexEntry, StoreError> {
        let file_path = self.dataset_path(symbol, frequency);
        let entry =
            IndexEntry::from_dataset(symbol, frequency, file_path, records, source, last_updated)?;
        self.write_entry(&entry)?;
        debug!(
            symbol,
            %frequency,
            records = entry.record_count,
            fingerprint = %entry.fingerprint,
            "index entry replaced"
        );
        Ok(entry)
    }

    /// Drop the entry for a series. Returns whether one existed.
    pub fn remove_entry(&self, symbol: &str, frequency: Frequency) -> Result<bool, StoreError> {
        let key = SeriesKey::new(symbol, frequency);
        let key_lock = self.key_lock(&key);
        let _guard = locks::lock(&key_lock);
        self.remove_locked(&key)
    }

    pub(crate) fn remove_locked(&self, key: &SeriesKey) -> Result<bool, StoreError> {
        if !locks::read(&self.entries).contains_key(key) {
            return Ok(false);
        }
        let conn = locks::lock(&self.conn);
        conn.execute(
            "DELETE FROM series_index WHERE symbol = ?1 AND frequency = ?2",
            params![key.symbol, key.frequency.as_str()],
        )
        .map_err(|e| StoreError::storage("index delete", e))?;
        Ok(locks::write(&self.entries).remove(key).is_some())
    }

    /// Replace the row for `entry`'s series, then mirror it into memory.
    /// Only that row is written.
    fn write_entry(&self, entry: &IndexEntry) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|e| StoreError::storage("index metadata serialization", e))?;
        let file_path = entry.file_path.to_string_lossy().into_owned();

        let conn = locks::lock(&self.conn);
        conn.execute(
            UPSERT_ENTRY,
            params![
                entry.symbol,
                entry.frequency.as_str(),
                entry.start_date,
                entry.end_date,
                entry.record_count as i64,
                file_path,
                entry.last_updated,
                entry.fingerprint,
                metadata,
            ],
        )
        .map_err(|e| StoreError::storage("index upsert", e))?;
        locks::write(&self.entries).insert(entry.key(), entry.clone());
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn get_entry(&self, symbol: &str, frequency: Frequency) -> Option<IndexEntry> {
        locks::read(&self.entries)
            .get(&SeriesKey::new(symbol, frequency))
            .cloned()
    }

    pub fn get_availability(&self, symbol: &str, frequency: Frequency) -> Availability {
        locks::read(&self.entries)
            .get(&SeriesKey::new(symbol, frequency))
            .map(Availability::from)
            .unwrap_or_else(Availability::missing)
    }

    /// Portions of `[requested_start, requested_end]` outside the stored
    /// `[start_date, end_date]`: zero, one or two disjoint ranges.
    pub fn get_missing_ranges(
        &self,
        symbol: &str,
        frequency: Frequency,
        requested_start: NaiveDate,
        requested_end: NaiveDate,
    ) -> Result<Vec<DateRange>, StoreError> {
        let requested = DateRange::new(requested_start, requested_end).ok_or_else(|| {
            StoreError::Validation(format!(
                "requested window starts after it ends ({requested_start} > {requested_end})"
            ))
        })?;

        Ok(match self.get_entry(symbol, frequency) {
            None => vec![requested],
            Some(entry) => boundary_gaps(requested, entry.date_range()),
        })
    }

    pub fn list_symbols(&self, frequency: Frequency) -> Vec<String> {
        locks::read(&self.entries)
            .keys()
            .filter(|k| k.frequency == frequency)
            .map(|k| k.symbol.clone())
            .collect()
    }

    pub fn summary(&self, frequency: Frequency) -> IndexSummary {
        let entries = locks::read(&self.entries);
        let of_freq = entries.values().filter(|e| e.frequency == frequency);

        let mut summary = IndexSummary {
            frequency,
            total_symbols: 0,
            total_records: 0,
            earliest_date: None,
            latest_date: None,
        };
        for entry in of_freq {
            summary.total_symbols += 1;
            summary.total_records += entry.record_count;
            summary.earliest_date = Some(
                summary
                    .earliest_date
                    .map_or(entry.start_date, |d| d.min(entry.start_date)),
            );
            summary.latest_date = Some(
                summary
                    .latest_date
                    .map_or(entry.end_date, |d| d.max(entry.end_date)),
            );
        }
        summary
    }

    // ── Integrity ───────────────────────────────────────────────────

    pub fn verify_integrity(&self, symbol: &str, frequency: Frequency) -> IntegrityReport {
        self.verify_integrity_with(symbol, frequency, VerifyOptions::default())
    }

    /// Reload the dataset and compare it against the stored entry. Reports
    /// every mismatch; never modifies the entry.
    pub fn verify_integrity_with(
        &self,
        symbol: &str,
        frequency: Frequency,
        options: VerifyOptions,
    ) -> IntegrityReport {
        let key = SeriesKey::new(symbol, frequency);
        let key_lock = self.key_lock(&key);
        let _guard = locks::lock(&key_lock);

        let issues = match self.get_entry(symbol, frequency) {
            None => vec![IntegrityIssue::MissingEntry],
            Some(entry) => check_entry(&entry, options),
        };

        let status = if issues.is_empty() {
            IntegrityStatus::Passed
        } else {
            IntegrityStatus::Failed
        };
        if status == IntegrityStatus::Failed {
            warn!(symbol, %frequency, issues = issues.len(), "integrity check failed");
        }

        IntegrityReport {
            symbol: symbol.to_string(),
            frequency,
            status,
            issues,
        }
    }

    /// Rebuild one entry from its dataset file. Removes the entry when the
    /// file is gone.
    pub fn repair(&self, symbol: &str, frequency: Frequency) -> Result<RepairOutcome, StoreError> {
        let key = SeriesKey::new(symbol, frequency);
        let key_lock = self.key_lock(&key);
        let _guard = locks::lock(&key_lock);

        let path = self.dataset_path(symbol, frequency);
        if !path.exists() {
            return Ok(if self.remove_locked(&key)? {
                info!(symbol, %frequency, "removed index entry without dataset");
                RepairOutcome::Removed
            } else {
                RepairOutcome::NothingStored
            });
        }

        let records = read_dataset_file(&path)?;
        if records.is_empty() {
            self.remove_locked(&key)?;
            return Ok(RepairOutcome::Removed);
        }
        // A repair does not make the data any newer: keep the previous stamp,
        // or take the file's modification time when there was no entry.
        let last_updated = self
            .get_entry(symbol, frequency)
            .map(|e| e.last_updated)
            .or_else(|| modified_at(&path))
            .unwrap_or_else(Utc::now);
        let entry = self.replace_locked(symbol, frequency, &records, "repair", last_updated)?;
        info!(symbol, %frequency, records = entry.record_count, "index entry rebuilt");
        Ok(RepairOutcome::Rebuilt(entry))
    }

    /// Rebuild every entry from the dataset files on disk.
    pub fn rebuild(&self) -> Result<RebuildReport, StoreError> {
        let mut keys: BTreeSet<SeriesKey> = locks::read(&self.entries).keys().cloned().collect();
        for frequency in Frequency::ALL {
            for symbol in scan_symbols(&self.historical, frequency)? {
                keys.insert(SeriesKey::new(symbol, frequency));
            }
        }

        let mut report = RebuildReport::default();
        for key in keys {
            match self.repair(&key.symbol, key.frequency) {
                Ok(RepairOutcome::Rebuilt(_)) => report.rebuilt += 1,
                Ok(RepairOutcome::Removed) => report.removed += 1,
                Ok(RepairOutcome::NothingStored) => {}
                Err(e) => {
                    warn!(series = %key, error = %e, "rebuild failed for series");
                    report.failed.push((key, e.to_string()));
                }
            }
        }
        info!(
            rebuilt = report.rebuilt,
            removed = report.removed,
            failed = report.failed.len(),
            "series index rebuilt"
        );
        Ok(report)
    }

    /// Drop entries whose dataset file no longer exists.
    pub fn cleanup_orphans(&self) -> Result<Vec<SeriesKey>, StoreError> {
        let candidates: Vec<SeriesKey> = locks::read(&self.entries)
            .iter()
            .filter(|(_, e)| !e.file_path.exists())
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = Vec::new();
        for key in candidates {
            let key_lock = self.key_lock(&key);
            let _guard = locks::lock(&key_lock);
            if !self.dataset_path(&key.symbol, key.frequency).exists() && self.remove_locked(&key)? {
                info!(series = %key, "removed orphaned index entry");
                removed.push(key);
            }
        }
        Ok(removed)
    }
}

fn open_database(path: &Path) -> rusqlite::Result<(Connection, BTreeMap<SeriesKey, IndexEntry>)> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;

    let mut entries = BTreeMap::new();
    {
        let mut stmt = conn.prepare(SELECT_ENTRIES)?;
        let rows = stmt.query_map([], entry_from_row)?;
        for entry in rows {
            let entry = entry?;
            entries.insert(entry.key(), entry);
        }
    }
    Ok((conn, entries))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<IndexEntry> {
    let frequency: String = row.get(1)?;
    let metadata: String = row.get(8)?;
    Ok(IndexEntry {
        symbol: row.get(0)?,
        frequency: frequency.parse().map_err(|e| bad_column(1, e))?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        record_count: usize::try_from(row.get::<_, i64>(4)?).map_err(|e| bad_column(4, e))?,
        file_path: PathBuf::from(row.get::<_, String>(5)?),
        last_updated: row.get(6)?,
        fingerprint: row.get(7)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| bad_column(8, e))?,
    })
}

fn bad_column(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Failures that mean the database itself cannot be trusted, as opposed to
/// the file being inaccessible.
fn is_corruption(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt | ErrorCode::Unknown
        ),
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => true,
        _ => false,
    }
}

/// Move the database (and its WAL sidecars) aside under a timestamped name
/// so earlier quarantines are never overwritten.
fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
    let with_suffix = |p: &Path, suffix: &str| {
        let mut name = p.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        p.with_file_name(name)
    };

    let mut target = with_suffix(path, &format!(".quarantined-{stamp}"));
    let mut n = 1;
    while target.exists() {
        target = with_suffix(path, &format!(".quarantined-{stamp}-{n}"));
        n += 1;
    }

    fs::rename(path, &target).map_err(|e| StoreError::storage("quarantine index", e))?;
    for sidecar in ["-wal", "-shm"] {
        let from = with_suffix(path, sidecar);
        if from.exists() {
            fs::rename(&from, with_suffix(&target, sidecar))
                .map_err(|e| StoreError::storage("quarantine index sidecar", e))?;
        }
    }
    Ok(target)
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Boundary-only gap detection of `requested` against `covered`.
pub fn boundary_gaps(requested: DateRange, covered: DateRange) -> Vec<DateRange> {
    let mut gaps = Vec::with_capacity(2);

    if requested.start < covered.start {
        if let Some(before) = covered.start.pred_opt() {
            gaps.extend(DateRange::new(requested.start, before.min(requested.end)));
        }
    }
    if requested.end > covered.end {
        if let Some(after) = covered.end.succ_opt() {
            gaps.extend(DateRange::new(after.max(requested.start), requested.end));
        }
    }
    gaps
}

fn check_entry(entry: &IndexEntry, options: VerifyOptions) -> Vec<IntegrityIssue> {
    let path = &entry.file_path;
    if !path.exists() {
        return vec![IntegrityIssue::MissingFile { path: path.clone() }];
    }

    let records = match read_dataset_file(path) {
        Ok(records) => records,
        Err(e) => {
            return vec![IntegrityIssue::Unreadable {
                reason: e.to_string(),
            }]
        }
    };
    let (first, last) = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (first.date, last.date),
        _ => return vec![IntegrityIssue::EmptyDataset],
    };

    let mut issues = Vec::new();

    if records.len() != entry.record_count {
        issues.push(IntegrityIssue::CountMismatch {
            expected: entry.record_count,
            actual: records.len(),
        });
    }

    let ordered = records.windows(2).all(|w| w[0].date < w[1].date);
    if !ordered {
        issues.push(IntegrityIssue::Unordered);
    }

    // Stored order is ascending, so first/last are the range when ordered.
    let actual = if ordered {
        DateRange {
            start: first,
            end: last,
        }
    } else {
        let start = records.iter().map(|r| r.date).min().unwrap_or(first);
        let end = records.iter().map(|r| r.date).max().unwrap_or(last);
        DateRange { start, end }
    };
    if actual != entry.date_range() {
        issues.push(IntegrityIssue::DateRangeMismatch {
            expected: entry.date_range(),
            actual,
        });
    }

    match fingerprint_canonical(&records) {
        Ok(fp) if fp != entry.fingerprint => issues.push(IntegrityIssue::FingerprintMismatch {
            expected: entry.fingerprint.clone(),
            actual: fp,
        }),
        Ok(_) => {}
        Err(e) => issues.push(IntegrityIssue::Unreadable {
            reason: e.to_string(),
        }),
    }

    if options.check_contiguity && entry.frequency == Frequency::Daily {
        let expected_days = actual.days();
        if records.len() as i64 != expected_days {
            issues.push(IntegrityIssue::NonContiguous {
                expected_days,
                actual_records: records.len(),
            });
        }
    }

    issues
}

/// Symbols with a dataset file in `{historical}/{frequency}`.
pub(crate) fn scan_symbols(historical: &Path, frequency: Frequency) -> Result<Vec<String>, StoreError> {
    let dir = layout::frequency_dir(historical, frequency);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut symbols = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|e| StoreError::storage("read dir", e))? {
        let path = entry.map_err(|e| StoreError::storage("dir entry", e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(layout::DATASET_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            symbols.push(stem.to_string());
        }
    }
    symbols.sort();
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parquet_io::write_dataset_file;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn range(a: NaiveDate, b: NaiveDate) -> DateRange {
        DateRange::new(a, b).unwrap()
    }

    fn daily(from: u32, to: u32) -> Vec<Record> {
        (from..=to)
            .map(|day| Record::new(d(1, day), 10.0, 11.0, 9.0, 10.0 + day as f64, 1_000))
            .collect()
    }

    /// Index plus a dataset file for `symbol`, as the store would leave them.
    fn seeded(dir: &Path, symbol: &str, records: &[Record]) -> SeriesIndex {
        let index = SeriesIndex::open(dir).unwrap();
        write_dataset_file(&index.dataset_path(symbol, Frequency::Daily), records).unwrap();
        index.upsert_entry(symbol, Frequency::Daily, records).unwrap();
        index
    }

    #[test]
    fn boundary_gaps_both_sides() {
        let gaps = boundary_gaps(range(d(1, 1), d(1, 25)), range(d(1, 10), d(1, 20)));
        assert_eq!(gaps, vec![range(d(1, 1), d(1, 9)), range(d(1, 21), d(1, 25))]);
    }

    #[test]
    fn boundary_gaps_inside_coverage_is_empty() {
        assert!(boundary_gaps(range(d(1, 12), d(1, 15)), range(d(1, 10), d(1, 20))).is_empty());
    }

    #[test]
    fn boundary_gaps_disjoint_windows() {
        let before = boundary_gaps(range(d(1, 1), d(1, 5)), range(d(1, 10), d(1, 20)));
        assert_eq!(before, vec![range(d(1, 1), d(1, 5))]);
        let after = boundary_gaps(range(d(2, 1), d(2, 5)), range(d(1, 10), d(1, 20)));
        assert_eq!(after, vec![range(d(2, 1), d(2, 5))]);
    }

    #[test]
    fn missing_ranges_without_entry_is_whole_window() {
        let dir = tempfile::tempdir().unwrap();
        let index = SeriesIndex::open(dir.path()).unwrap();
        let gaps = index
            .get_missing_ranges("600000", Frequency::Daily, d(1, 1), d(1, 31))
            .unwrap();
        assert_eq!(gaps, vec![range(d(1, 1), d(1, 31))]);
    }

    #[test]
    fn missing_ranges_rejects_inverted_window() {
        let dir = tempfile::tempdir().unwrap();
        let index = SeriesIndex::open(dir.path()).unwrap();
        let err = index
            .get_missing_ranges("600000", Frequency::Daily, d(1, 5), d(1, 1))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn upsert_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 10));
        let stored = index.get_entry("000001", Frequency::Daily);
        drop(index);

        let reopened = SeriesIndex::open(dir.path()).unwrap();
        let avail = reopened.get_availability("000001", Frequency::Daily);
        assert!(avail.available);
        assert_eq!(avail.record_count, 10);
        assert_eq!(avail.start_date, Some(d(1, 1)));
        assert_eq!(avail.end_date, Some(d(1, 10)));
        assert_eq!(reopened.get_entry("000001", Frequency::Daily), stored);
    }

    #[test]
    fn upsert_rewrites_only_its_own_row() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 10));
        let first = index.get_entry("000001", Frequency::Daily).unwrap();

        write_dataset_file(&index.dataset_path("000002", Frequency::Daily), &daily(1, 3)).unwrap();
        index.upsert_entry("000002", Frequency::Daily, &daily(1, 3)).unwrap();
        index.upsert_entry("000002", Frequency::Daily, &daily(1, 4)).unwrap();
        drop(index);

        let reopened = SeriesIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get_entry("000001", Frequency::Daily), Some(first));
        assert_eq!(reopened.get_availability("000002", Frequency::Daily).record_count, 4);
    }

    #[test]
    fn availability_for_unknown_series() {
        let dir = tempfile::tempdir().unwrap();
        let index = SeriesIndex::open(dir.path()).unwrap();
        let avail = index.get_availability("nope", Frequency::Weekly);
        assert!(!avail.available);
        assert_eq!(avail.record_count, 0);
        assert!(avail.last_updated.is_none());
    }

    #[test]
    fn verify_passes_after_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 10));
        let report = index.verify_integrity("000001", Frequency::Daily);
        assert!(report.passed(), "{:?}", report.issues);
    }

    #[test]
    fn verify_reports_every_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 10));

        // Rewrite the file behind the index's back, dropping the middle.
        let mut shrunk = daily(1, 3);
        shrunk.extend(daily(8, 12));
        write_dataset_file(&index.dataset_path("000001", Frequency::Daily), &shrunk).unwrap();

        let report = index.verify_integrity_with(
            "000001",
            Frequency::Daily,
            VerifyOptions {
                check_contiguity: true,
            },
        );
        assert_eq!(report.status, IntegrityStatus::Failed);
        assert!(report
            .issues
            .contains(&IntegrityIssue::CountMismatch { expected: 10, actual: 8 }));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::DateRangeMismatch { .. })));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::FingerprintMismatch { .. })));
        assert!(report.issues.contains(&IntegrityIssue::NonContiguous {
            expected_days: 12,
            actual_records: 8
        }));
    }

    #[test]
    fn verify_does_not_repair() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 10));
        write_dataset_file(&index.dataset_path("000001", Frequency::Daily), &daily(1, 5)).unwrap();

        assert!(!index.verify_integrity("000001", Frequency::Daily).passed());
        assert!(!index.verify_integrity("000001", Frequency::Daily).passed());
        assert_eq!(index.get_entry("000001", Frequency::Daily).unwrap().record_count, 10);

        let outcome = index.repair("000001", Frequency::Daily).unwrap();
        assert!(matches!(outcome, RepairOutcome::Rebuilt(ref e) if e.record_count == 5));
        assert!(index.verify_integrity("000001", Frequency::Daily).passed());
    }

    #[test]
    fn verify_missing_entry_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 3));

        let report = index.verify_integrity("999999", Frequency::Daily);
        assert_eq!(report.issues, vec![IntegrityIssue::MissingEntry]);

        fs::remove_file(index.dataset_path("000001", Frequency::Daily)).unwrap();
        let report = index.verify_integrity("000001", Frequency::Daily);
        assert!(matches!(report.issues[..], [IntegrityIssue::MissingFile { .. }]));
    }

    #[test]
    fn summary_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 10));
        write_dataset_file(&index.dataset_path("000002", Frequency::Daily), &daily(5, 20)).unwrap();
        index.upsert_entry("000002", Frequency::Daily, &daily(5, 20)).unwrap();

        assert_eq!(index.list_symbols(Frequency::Daily), vec!["000001", "000002"]);
        assert!(index.list_symbols(Frequency::Monthly).is_empty());

        let summary = index.summary(Frequency::Daily);
        assert_eq!(summary.total_symbols, 2);
        assert_eq!(summary.total_records, 26);
        assert_eq!(summary.earliest_date, Some(d(1, 1)));
        assert_eq!(summary.latest_date, Some(d(1, 20)));
    }

    fn quarantined(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| {
                        n.starts_with("index.db.quarantined-")
                            && !n.ends_with("-wal")
                            && !n.ends_with("-shm")
                    })
            })
            .collect();
        found.sort();
        found
    }

    fn set_mtime(path: &Path, at: std::time::SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    #[test]
    fn corrupt_index_is_quarantined_and_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 4));
        let path = index.path().to_path_buf();
        drop(index);
        fs::write(&path, vec![0xAB_u8; 8192]).unwrap();

        let index = SeriesIndex::open(dir.path()).unwrap();
        assert!(index.is_empty());
        assert_eq!(quarantined(dir.path()).len(), 1);

        let report = index.rebuild().unwrap();
        assert_eq!(report.rebuilt, 1);
        assert_eq!(index.get_availability("000001", Frequency::Daily).record_count, 4);
    }

    #[test]
    fn repeated_corruption_keeps_every_quarantined_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = SeriesIndex::open(dir.path()).unwrap().path().to_path_buf();

        fs::write(&path, vec![0x01_u8; 8192]).unwrap();
        drop(SeriesIndex::open(dir.path()).unwrap());
        fs::write(&path, vec![0x02_u8; 8192]).unwrap();
        drop(SeriesIndex::open(dir.path()).unwrap());

        let copies = quarantined(dir.path());
        assert_eq!(copies.len(), 2);
        let contents: BTreeSet<Vec<u8>> = copies.iter().map(|p| fs::read(p).unwrap()).collect();
        assert!(contents.contains(&vec![0x01_u8; 8192]));
        assert!(contents.contains(&vec![0x02_u8; 8192]));
    }

    #[test]
    fn undecodable_row_quarantines_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 4));
        let path = index.path().to_path_buf();
        drop(index);

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE series_index SET frequency = 'hourly'", []).unwrap();
        drop(conn);

        let index = SeriesIndex::open(dir.path()).unwrap();
        assert!(index.is_empty());
        assert_eq!(quarantined(dir.path()).len(), 1);
    }

    #[test]
    fn repair_keeps_the_previous_update_time() {
        let dir = tempfile::tempdir().unwrap();
        let index = SeriesIndex::open(dir.path()).unwrap();
        let records = daily(1, 10);
        write_dataset_file(&index.dataset_path("000001", Frequency::Daily), &records).unwrap();
        let aged = Utc::now() - chrono::Duration::days(60);
        index
            .replace_locked("000001", Frequency::Daily, &records, "upsert", aged)
            .unwrap();

        let outcome = index.repair("000001", Frequency::Daily).unwrap();
        assert!(matches!(outcome, RepairOutcome::Rebuilt(ref e) if e.last_updated == aged));
        assert_eq!(
            index.get_availability("000001", Frequency::Daily).last_updated,
            Some(aged)
        );

        // Only a save moves the stamp forward.
        let saved = index.upsert_entry("000001", Frequency::Daily, &records).unwrap();
        assert!(saved.last_updated > aged);
    }

    #[test]
    fn rebuild_without_entry_uses_file_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 4));
        let path = index.path().to_path_buf();
        drop(index);

        let dataset = layout::dataset_path(dir.path(), "000001", Frequency::Daily);
        let sixty_days = std::time::Duration::from_secs(60 * 24 * 3600);
        set_mtime(&dataset, std::time::SystemTime::now() - sixty_days);
        fs::write(&path, vec![0xAB_u8; 8192]).unwrap();

        let index = SeriesIndex::open(dir.path()).unwrap();
        assert_eq!(index.rebuild().unwrap().rebuilt, 1);
        let stamp = index
            .get_availability("000001", Frequency::Daily)
            .last_updated
            .unwrap();
        assert!(stamp < Utc::now() - chrono::Duration::days(59), "{stamp}");
    }

    #[test]
    fn cleanup_removes_orphans_only() {
        let dir = tempfile::tempdir().unwrap();
        let index = seeded(dir.path(), "000001", &daily(1, 4));
        write_dataset_file(&index.dataset_path("000002", Frequency::Daily), &daily(1, 2)).unwrap();
        index.upsert_entry("000002", Frequency::Daily, &daily(1, 2)).unwrap();
        fs::remove_file(index.dataset_path("000002", Frequency::Daily)).unwrap();

        let removed = index.cleanup_orphans().unwrap();
        assert_eq!(removed, vec![SeriesKey::new("000002", Frequency::Daily)]);
        assert_eq!(index.list_symbols(Frequency::Daily), vec!["000001"]);
    }
}
