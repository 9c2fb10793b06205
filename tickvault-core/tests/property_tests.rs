//! Property tests for store invariants.
//!
//! Uses proptest to verify:
//! 1. Round-trip — saved records load back sorted, unique by date
//! 2. Merge — union of dates, later save wins on overlap
//! 3. Index consistency — verification passes right after any save
//! 4. Gap detection — gaps never overlap the stored window and stay inside
//!    the requested one

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tickvault_core::data::{boundary_gaps, DatasetStore};
use tickvault_core::{DateRange, Frequency, Record};

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_record() -> impl Strategy<Value = Record> {
    (0i64..120, 1.0..500.0_f64, 0u64..10_000_000).prop_map(|(offset, close, volume)| {
        let close = (close * 100.0).round() / 100.0;
        Record::new(base() + Duration::days(offset), close, close * 1.01, close * 0.99, close, volume)
    })
}

fn arb_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(arb_record(), 1..40)
}

fn arb_range() -> impl Strategy<Value = DateRange> {
    (0i64..200, 0i64..60).prop_map(|(start, len)| {
        let start = base() + Duration::days(start);
        DateRange::new(start, start + Duration::days(len)).unwrap()
    })
}

/// Last record per date, in input order.
fn last_by_date(records: &[Record]) -> BTreeMap<NaiveDate, Record> {
    records.iter().map(|r| (r.date, r.clone())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn round_trip_is_sorted_and_unique(records in arb_records()) {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::open(dir.path()).unwrap();
        store.save("P", Frequency::Daily, &records, false).unwrap();

        let expected = last_by_date(&records);
        let first = *expected.keys().next().unwrap();
        let last = *expected.keys().next_back().unwrap();
        let loaded = store.load("P", Frequency::Daily, Some(first), Some(last)).unwrap().unwrap();

        let dates: Vec<NaiveDate> = loaded.iter().map(|r| r.date).collect();
        let want: Vec<NaiveDate> = expected.keys().copied().collect();
        prop_assert_eq!(dates, want);
    }

    #[test]
    fn merge_is_union_with_last_write_wins(r1 in arb_records(), r2 in arb_records()) {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::open(dir.path()).unwrap();
        store.save("P", Frequency::Daily, &r1, false).unwrap();
        store.save("P", Frequency::Daily, &r2, false).unwrap();

        let loaded = store.load("P", Frequency::Daily, None, None).unwrap().unwrap();
        let first = last_by_date(&r1);
        let second = last_by_date(&r2);

        let dates: BTreeSet<NaiveDate> = loaded.iter().map(|r| r.date).collect();
        let union: BTreeSet<NaiveDate> = first.keys().chain(second.keys()).copied().collect();
        prop_assert_eq!(dates, union);

        for record in &loaded {
            let expected = second.get(&record.date).or_else(|| first.get(&record.date)).unwrap();
            prop_assert_eq!(record, expected);
        }
    }

    #[test]
    fn verify_passes_after_every_save(batches in prop::collection::vec(arb_records(), 1..4)) {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::open(dir.path()).unwrap();
        for batch in &batches {
            store.save("P", Frequency::Weekly, batch, false).unwrap();
            let report = store.index().verify_integrity("P", Frequency::Weekly);
            prop_assert!(report.passed(), "{:?}", report.issues);
        }
    }

    #[test]
    fn boundary_gaps_stay_inside_request_and_outside_coverage(
        requested in arb_range(),
        covered in arb_range(),
    ) {
        let gaps = boundary_gaps(requested, covered);
        prop_assert!(gaps.len() <= 2);
        for gap in &gaps {
            prop_assert!(gap.start >= requested.start && gap.end <= requested.end);
            prop_assert!(gap.end < covered.start || gap.start > covered.end);
        }
        if gaps.len() == 2 {
            prop_assert!(gaps[0].end < gaps[1].start);
        }
        // Everything requested is either covered or in a gap.
        let mut day = requested.start;
        while day <= requested.end {
            prop_assert!(covered.contains(day) || gaps.iter().any(|g| g.contains(day)));
            day += Duration::days(1);
        }
    }
}
