//! Integration tests for the dataset store and series index working together.

use chrono::NaiveDate;
use std::sync::Arc;
use std::thread;
use tickvault_core::data::{DatasetStore, IntegrityStatus, SeriesIndex};
use tickvault_core::{DateRange, Frequency, Record};

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, day).unwrap()
}

fn rows(from: u32, to: u32, close: f64) -> Vec<Record> {
    (from..=to)
        .map(|day| {
            Record::new(d(1, day), close - 0.5, close + 1.0, close - 1.0, close, 10_000 * day as u64)
        })
        .collect()
}

// ── End-to-end ───────────────────────────────────────────────────────

#[test]
fn save_merge_and_query_000001() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::open(dir.path()).unwrap();

    store.save("000001", Frequency::Daily, &rows(1, 10, 10.0), false).unwrap();
    let avail = store.index().get_availability("000001", Frequency::Daily);
    assert!(avail.available);
    assert_eq!(avail.record_count, 10);
    assert_eq!(avail.start_date, Some(d(1, 1)));
    assert_eq!(avail.end_date, Some(d(1, 10)));

    store.save("000001", Frequency::Daily, &rows(8, 15, 20.0), false).unwrap();
    let loaded = store.load("000001", Frequency::Daily, None, None).unwrap().unwrap();
    assert_eq!(loaded.len(), 15);
    assert_eq!(loaded.first().unwrap().date, d(1, 1));
    assert_eq!(loaded.last().unwrap().date, d(1, 15));
    for r in &loaded {
        let expected = if r.date >= d(1, 8) { 20.0 } else { 10.0 };
        assert_eq!(r.close, expected, "wrong version kept for {}", r.date);
    }

    let avail = store.index().get_availability("000001", Frequency::Daily);
    assert_eq!(avail.record_count, 15);
    assert_eq!(avail.end_date, Some(d(1, 15)));
    assert!(store.index().verify_integrity("000001", Frequency::Daily).passed());
}

#[test]
fn gap_detection_around_stored_window() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::open(dir.path()).unwrap();
    store.save("000001", Frequency::Daily, &rows(10, 20, 10.0), false).unwrap();

    let gaps = store
        .index()
        .get_missing_ranges("000001", Frequency::Daily, d(1, 1), d(1, 25))
        .unwrap();
    assert_eq!(
        gaps,
        vec![
            DateRange::new(d(1, 1), d(1, 9)).unwrap(),
            DateRange::new(d(1, 21), d(1, 25)).unwrap(),
        ]
    );
}

#[test]
fn interior_holes_are_not_reported_as_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::open(dir.path()).unwrap();
    let mut holed = rows(1, 5, 10.0);
    holed.extend(rows(15, 20, 10.0));
    store.save("000001", Frequency::Daily, &holed, false).unwrap();

    let gaps = store
        .index()
        .get_missing_ranges("000001", Frequency::Daily, d(1, 1), d(1, 20))
        .unwrap();
    assert!(gaps.is_empty());
}

#[test]
fn identical_saves_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::open(dir.path()).unwrap();
    let data = rows(1, 7, 12.5);

    store.save("600519", Frequency::Daily, &data, false).unwrap();
    let first = store.index().get_entry("600519", Frequency::Daily).unwrap();
    store.save("600519", Frequency::Daily, &data, false).unwrap();
    let second = store.index().get_entry("600519", Frequency::Daily).unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.record_count, second.record_count);
    assert_eq!(first.date_range(), second.date_range());
}

#[test]
fn index_survives_reopen_and_files_load_without_it() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = DatasetStore::open(dir.path()).unwrap();
        store.save("000001", Frequency::Monthly, &rows(1, 3, 5.0), false).unwrap();
    }
    std::fs::remove_file(dir.path().join("historical").join("index.db")).unwrap();

    let store = DatasetStore::open(dir.path()).unwrap();
    assert!(!store.index().get_availability("000001", Frequency::Monthly).available);
    assert_eq!(
        store.load("000001", Frequency::Monthly, None, None).unwrap().unwrap().len(),
        3
    );

    store.index().rebuild().unwrap();
    let report = store.index().verify_integrity("000001", Frequency::Monthly);
    assert_eq!(report.status, IntegrityStatus::Passed);
}

#[test]
fn verify_after_save_passes_for_every_frequency() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::open(dir.path()).unwrap();
    for frequency in Frequency::ALL {
        store.save("000001", frequency, &rows(2, 9, 3.0), false).unwrap();
        assert!(store.index().verify_integrity("000001", frequency).passed());
    }
    assert_eq!(store.index().summary(Frequency::Weekly).total_records, 8);
}

// ── Concurrency ──────────────────────────────────────────────────────

#[test]
fn concurrent_saves_to_one_series_keep_index_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DatasetStore::open(dir.path()).unwrap());

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let day = i * 3 + 1;
                store
                    .save("000001", Frequency::Daily, &rows(day, day + 2, i as f64 + 1.0), false)
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let loaded = store.load("000001", Frequency::Daily, None, None).unwrap().unwrap();
    assert_eq!(loaded.len(), 24);
    assert!(store.index().verify_integrity("000001", Frequency::Daily).passed());
}

#[test]
fn concurrent_saves_to_different_series() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DatasetStore::open(dir.path()).unwrap());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let symbol = format!("00000{i}");
                store.save(&symbol, Frequency::Daily, &rows(1, 5, 1.0), false).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Reopening reads the persisted index, not the in-memory copy.
    let reopened = SeriesIndex::open(dir.path().join("historical")).unwrap();
    assert_eq!(reopened.list_symbols(Frequency::Daily).len(), 6);
    assert_eq!(reopened.summary(Frequency::Daily).total_records, 30);
}
