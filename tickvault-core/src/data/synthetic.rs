//! Deterministic synthetic rows for offline runs and tests.
//!
//! The RNG is seeded from `blake3(symbol, window start)`, so the same request
//! always yields the same rows. Daily series skip weekends, weekly series
//! emit Fridays, monthly series emit the last weekday of each month.

use super::provider::{FetchError, RowFetcher};
use crate::domain::{DateRange, Frequency, Record};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticFetcher {
    start_price: f64,
}

impl SyntheticFetcher {
    pub fn new() -> Self {
        Self { start_price: 100.0 }
    }

    pub fn with_start_price(start_price: f64) -> Self {
        Self { start_price }
    }

    pub fn generate(&self, symbol: &str, range: DateRange, frequency: Frequency) -> Vec<Record> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(symbol.as_bytes());
        hasher.update(range.start.to_string().as_bytes());
        let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

        // Scale bar-to-bar moves with the sampling interval.
        let (max_move, volume_scale) = match frequency {
            Frequency::Daily => (0.03, 1),
            Frequency::Weekly => (0.07, 5),
            Frequency::Monthly => (0.15, 21),
        };

        let mut rows = Vec::new();
        let mut price = self.start_price;
        let mut current = range.start;

        while current <= range.end {
            if emits_on(current, frequency) {
                let ret: f64 = rng.gen_range(-max_move..max_move);
                let open = price;
                let close = price * (1.0 + ret);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
                let volume = rng.gen_range(500_000..5_000_000u64) * volume_scale;

                rows.push(
                    Record::new(current, open, high, low, close, volume)
                        .with_extra("change_pct", ret * 100.0),
                );
                price = close;
            }
            current += Duration::days(1);
        }
        rows
    }
}

impl Default for SyntheticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn emits_on(date: NaiveDate, frequency: Frequency) -> bool {
    match frequency {
        Frequency::Daily => is_weekday(date),
        Frequency::Weekly => date.weekday() == Weekday::Fri,
        Frequency::Monthly => {
            // Last weekday of the month: no weekday follows it in the same month.
            is_weekday(date)
                && (1..=3)
                    .map(|k| date + Duration::days(k))
                    .take_while(|next| next.month() == date.month())
                    .all(|next| !is_weekday(next))
        }
    }
}

impl RowFetcher for SyntheticFetcher {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_rows(
        &self,
        symbol: &str,
        range: DateRange,
        frequency: Frequency,
    ) -> Result<Vec<Record>, FetchError> {
        Ok(self.generate(symbol, range, frequency))
    }
}
