//! On-disk layout.
//!
//! ```text
//! {root}/historical/{daily,weekly,monthly}/{SYMBOL}.parquet
//! {root}/historical/index.db
//! ```

use crate::domain::Frequency;
use std::path::{Path, PathBuf};

pub const DATASET_EXT: &str = "parquet";
pub const INDEX_FILE: &str = "index.db";

/// `{root}/historical`
pub fn historical_dir(root: &Path) -> PathBuf {
    root.join("historical")
}

/// `{historical}/{frequency}`
pub fn frequency_dir(historical: &Path, frequency: Frequency) -> PathBuf {
    historical.join(frequency.as_str())
}

/// `{historical}/{frequency}/{symbol}.parquet`
pub fn dataset_path(historical: &Path, symbol: &str, frequency: Frequency) -> PathBuf {
    frequency_dir(historical, frequency).join(format!("{symbol}.{DATASET_EXT}"))
}

/// `{historical}/index.db`
pub fn index_path(historical: &Path) -> PathBuf {
    historical.join(INDEX_FILE)
}

/// Sibling temp path used for write-then-rename.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_path_is_partitioned_by_frequency() {
        let hist = historical_dir(Path::new("/data"));
        let p = dataset_path(&hist, "000001", Frequency::Weekly);
        assert_eq!(p, PathBuf::from("/data/historical/weekly/000001.parquet"));
        assert_eq!(index_path(&hist), PathBuf::from("/data/historical/index.db"));
    }

    #[test]
    fn temp_path_appends_suffix() {
        let p = temp_path(Path::new("/x/000001.parquet"));
        assert_eq!(p, PathBuf::from("/x/000001.parquet.tmp"));
    }
}
