//! Per-series locking.
//!
//! Every write to a `(symbol, frequency)` dataset and its index entry runs
//! under that key's mutex, so two workers refreshing the same series are
//! serialized while different series proceed in parallel.

use crate::domain::SeriesKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<SeriesKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `key`, created on first use.
    pub fn lock_for(&self, key: &SeriesKey) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.locks);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

// Poisoned guards are recovered. The protected data is `()`, a map whose
// entries are only ever replaced wholesale, or a SQLite connection whose
// statements commit atomically.

pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Frequency;

    #[test]
    fn same_key_shares_one_mutex() {
        let locks = KeyLocks::new();
        let a = locks.lock_for(&SeriesKey::new("000001", Frequency::Daily));
        let b = locks.lock_for(&SeriesKey::new("000001", Frequency::Daily));
        let c = locks.lock_for(&SeriesKey::new("000001", Frequency::Weekly));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
