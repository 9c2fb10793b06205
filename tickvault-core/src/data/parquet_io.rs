//! Parquet encoding of datasets.
//!
//! One file per `(symbol, frequency)`. Base columns are fixed
//! (`date, open, high, low, close, volume`); every extension field seen in
//! any record becomes an extra nullable `Float64` column. Files are
//! self-describing and can be read without the series index.

use super::layout::temp_path;
use crate::domain::{Record, BASE_COLUMNS};
use crate::error::StoreError;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// 1970-01-01, the origin of Polars' `Date` physical representation.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn parquet_err(context: &str) -> impl Fn(PolarsError) -> StoreError + '_ {
    move |e| StoreError::Storage(format!("parquet {context}: {e}"))
}

/// Write records atomically: encode to `{path}.tmp`, then rename into place.
///
/// Callers pass canonical (sorted, de-duplicated) records.
pub fn write_dataset_file(path: &Path, records: &[Record]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StoreError::storage("create dataset dir", e))?;
    }

    let mut df = records_to_dataframe(records)?;
    let tmp_path = temp_path(path);

    let file = fs::File::create(&tmp_path)
        .map_err(|e| StoreError::storage("create temp dataset file", e))?;
    if let Err(e) = ParquetWriter::new(file).finish(&mut df) {
        let _ = fs::remove_file(&tmp_path);
        return Err(parquet_err("write")(e));
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::storage("atomic rename failed", e)
    })
}

/// Read a dataset file back into records, in stored order.
pub fn read_dataset_file(path: &Path) -> Result<Vec<Record>, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::storage("open dataset", e))?;
    let df = ParquetReader::new(file).finish().map_err(parquet_err("read"))?;

    for col_name in BASE_COLUMNS {
        if df.column(col_name).is_err() {
            return Err(StoreError::Storage(format!(
                "dataset {} is missing column '{col_name}'",
                path.display()
            )));
        }
    }

    dataframe_to_records(&df)
}

/// Convert records to a Polars DataFrame.
fn records_to_dataframe(records: &[Record]) -> Result<DataFrame, StoreError> {
    let epoch = epoch();
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();
    let opens: Vec<f64> = records.iter().map(|r| r.open).collect();
    let highs: Vec<f64> = records.iter().map(|r| r.high).collect();
    let lows: Vec<f64> = records.iter().map(|r| r.low).collect();
    let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
    let volumes: Vec<u64> = records.iter().map(|r| r.volume).collect();

    let mut columns = vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(parquet_err("date cast"))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ];

    let extra_keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.extra.keys().map(|k| k.as_str()))
        .collect();
    for key in extra_keys {
        let values: Vec<Option<f64>> = records.iter().map(|r| r.extra.get(key).copied()).collect();
        columns.push(Column::new(key.into(), values));
    }

    DataFrame::new(columns).map_err(parquet_err("dataframe creation"))
}

/// Convert a DataFrame back to records.
fn dataframe_to_records(df: &DataFrame) -> Result<Vec<Record>, StoreError> {
    let column = |name: &str| df.column(name).map_err(parquet_err("column read"));

    let date_ca = column("date")?
        .date()
        .map_err(parquet_err("date column type"))?
        .clone();
    let open_ca = as_f64(column("open")?)?;
    let high_ca = as_f64(column("high")?)?;
    let low_ca = as_f64(column("low")?)?;
    let close_ca = as_f64(column("close")?)?;
    let vol_ca = column("volume")?
        .cast(&DataType::UInt64)
        .map_err(parquet_err("volume cast"))?
        .u64()
        .map_err(parquet_err("volume column type"))?
        .clone();

    let extra_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !BASE_COLUMNS.contains(&name.as_str()))
        .collect();
    let mut extra_cols = Vec::with_capacity(extra_names.len());
    for name in &extra_names {
        extra_cols.push((name.as_str(), as_f64(column(name)?)?));
    }

    let epoch = epoch();
    let n = df.height();
    let mut records = Vec::with_capacity(n);

    for i in 0..n {
        let null_at = |col: &str| StoreError::Storage(format!("null {col} at row {i}"));
        let date_days = date_ca.get(i).ok_or_else(|| null_at("date"))?;

        let mut extra = BTreeMap::new();
        for (name, ca) in &extra_cols {
            if let Some(value) = ca.get(i) {
                extra.insert((*name).to_string(), value);
            }
        }

        records.push(Record {
            date: epoch + chrono::Duration::days(date_days as i64),
            open: open_ca.get(i).ok_or_else(|| null_at("open"))?,
            high: high_ca.get(i).ok_or_else(|| null_at("high"))?,
            low: low_ca.get(i).ok_or_else(|| null_at("low"))?,
            close: close_ca.get(i).ok_or_else(|| null_at("close"))?,
            volume: vol_ca.get(i).ok_or_else(|| null_at("volume"))?,
            extra,
        });
    }

    Ok(records)
}

fn as_f64(column: &Column) -> Result<Float64Chunked, StoreError> {
    Ok(column
        .cast(&DataType::Float64)
        .map_err(parquet_err("float cast"))?
        .f64()
        .map_err(parquet_err("float column type"))?
        .clone())
}
