//! CSV and JSON conversion for records — import of external row files and
//! export of stored datasets.
//!
//! CSV layout: a header row naming at least `date, open, high, low, close,
//! volume`; any other column with numeric cells becomes an extension field.
//! Dates are `YYYY-MM-DD` or `YYYYMMDD`.

use crate::domain::{Record, BASE_COLUMNS};
use crate::error::StoreError;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(StoreError::Validation(format!(
                "unsupported export format '{other}' (expected csv or json)"
            ))),
        }
    }
}

// ─── Export ─────────────────────────────────────────────────────────

pub fn render(records: &[Record], format: ExportFormat) -> Result<String, StoreError> {
    match format {
        ExportFormat::Csv => records_to_csv(records),
        ExportFormat::Json => serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::storage("JSON export", e)),
    }
}

/// Base columns followed by every extension field, sorted by name.
pub fn records_to_csv(records: &[Record]) -> Result<String, StoreError> {
    let csv_err = |e: csv::Error| StoreError::storage("CSV export", e);
    let extras: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.extra.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_writer(vec![]);
    let header: Vec<&str> = BASE_COLUMNS.iter().copied().chain(extras.iter().copied()).collect();
    wtr.write_record(&header).map_err(csv_err)?;

    for r in records {
        let mut row = vec![
            r.date.format("%Y-%m-%d").to_string(),
            r.open.to_string(),
            r.high.to_string(),
            r.low.to_string(),
            r.close.to_string(),
            r.volume.to_string(),
        ];
        row.extend(
            extras
                .iter()
                .map(|k| r.extra.get(*k).map(|v| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&row).map_err(csv_err)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| StoreError::storage("CSV flush", e.error()))?;
    String::from_utf8(data).map_err(|e| StoreError::storage("CSV output", e))
}

// ─── Import ─────────────────────────────────────────────────────────

pub fn read_csv_file(path: &Path) -> Result<Vec<Record>, StoreError> {
    let file = std::fs::File::open(path)
        .map_err(|e| StoreError::storage(&format!("open {}", path.display()), e))?;
    parse_csv_records(file)
}

/// Parse CSV rows into records, in file order.
pub fn parse_csv_records(reader: impl Read) -> Result<Vec<Record>, StoreError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| StoreError::Validation(format!("CSV header: {e}")))?
        .clone();

    let position = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let mut base = [0usize; 6];
    for (slot, name) in base.iter_mut().zip(BASE_COLUMNS) {
        *slot = position(name)
            .ok_or_else(|| StoreError::Validation(format!("CSV is missing the '{name}' column")))?;
    }
    let extras: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| !base.contains(i))
        .map(|(i, h)| (i, h.to_string()))
        .filter(|(_, h)| !h.is_empty())
        .collect();

    let mut records = Vec::new();
    for (line, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| StoreError::Validation(format!("CSV row {}: {e}", line + 1)))?;
        let cell = |i: usize| row.get(i).unwrap_or("");
        let bad = |col: &str, value: &str| {
            StoreError::Validation(format!("CSV row {}: invalid {col} '{value}'", line + 1))
        };

        let date = parse_date(cell(base[0])).ok_or_else(|| bad("date", cell(base[0])))?;
        let mut prices = [0.0f64; 4];
        for (k, price) in prices.iter_mut().enumerate() {
            let raw = cell(base[k + 1]);
            *price = raw.parse().map_err(|_| bad(BASE_COLUMNS[k + 1], raw))?;
        }
        let raw_volume = cell(base[5]);
        let volume = parse_volume(raw_volume).ok_or_else(|| bad("volume", raw_volume))?;

        let mut record = Record::new(date, prices[0], prices[1], prices[2], prices[3], volume);
        for (i, name) in &extras {
            if let Ok(value) = cell(*i).parse::<f64>() {
                if value.is_finite() {
                    record.extra.insert(name.clone(), value);
                }
            }
        }
        records.push(record);
    }
    Ok(records)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

/// Volumes arrive as integers or as floats (`1.2e6`, `35000.0`).
fn parse_volume(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64)
    })
}
