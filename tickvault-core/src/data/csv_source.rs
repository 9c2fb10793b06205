//! Fetcher that reads rows from a directory of CSV exports.
//!
//! Lookup order for a symbol: `{dir}/{frequency}/{SYMBOL}.csv`, then
//! `{dir}/{SYMBOL}.csv`. Only rows inside the requested window are returned.

use super::export::read_csv_file;
use super::provider::{FetchError, RowFetcher};
use crate::domain::{validate_symbol, DateRange, Frequency, Record};
use std::path::PathBuf;

pub struct CsvDirFetcher {
    dir: PathBuf,
}

impl CsvDirFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn locate(&self, symbol: &str, frequency: Frequency) -> Option<PathBuf> {
        [
            self.dir.join(frequency.as_str()).join(format!("{symbol}.csv")),
            self.dir.join(format!("{symbol}.csv")),
        ]
        .into_iter()
        .find(|p| p.is_file())
    }
}

impl RowFetcher for CsvDirFetcher {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_rows(
        &self,
        symbol: &str,
        range: DateRange,
        frequency: Frequency,
    ) -> Result<Vec<Record>, FetchError> {
        let not_found = || FetchError::SymbolNotFound {
            symbol: symbol.to_string(),
        };
        validate_symbol(symbol).map_err(|_| not_found())?;
        let path = self.locate(symbol, frequency).ok_or_else(not_found)?;

        let mut rows = read_csv_file(&path).map_err(|e| {
            FetchError::ResponseFormatChanged(format!("{}: {e}", path.display()))
        })?;
        rows.retain(|r| range.contains(r.date));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn prefers_frequency_subdirectory_and_filters_window() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("daily")).unwrap();
        fs::write(
            dir.path().join("daily").join("000001.csv"),
            "date,open,high,low,close,volume\n\
             2024-01-02,1,1,1,1,10\n\
             2024-01-03,2,2,2,2,20\n\
             2024-01-04,3,3,3,3,30\n",
        )
        .unwrap();
        fs::write(dir.path().join("000001.csv"), "date,open,high,low,close,volume\n").unwrap();

        let fetcher = CsvDirFetcher::new(dir.path());
        let rows = fetcher
            .fetch_rows("000001", DateRange::new(d(3), d(10)).unwrap(), Frequency::Daily)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(3));
    }

    #[test]
    fn missing_file_is_symbol_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CsvDirFetcher::new(dir.path());
        let err = fetcher
            .fetch_rows("600000", DateRange::new(d(1), d(2)).unwrap(), Frequency::Weekly)
            .unwrap_err();
        assert!(matches!(err, FetchError::SymbolNotFound { .. }));
    }

    #[test]
    fn malformed_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("000002.csv"), "when,price\n2024-01-02,1\n").unwrap();
        let fetcher = CsvDirFetcher::new(dir.path());
        let err = fetcher
            .fetch_rows("000002", DateRange::new(d(1), d(2)).unwrap(), Frequency::Daily)
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseFormatChanged(_)));
    }
}
