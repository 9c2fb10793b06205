//! Dataset fingerprinting — deterministic content hashes over canonical
//! record sequences.
//!
//! The hash is BLAKE3 over the JSON serialization of the records after
//! canonicalization (ascending by date, one record per date). Extension
//! fields live in a `BTreeMap`, so key order is stable and two datasets
//! with the same content always produce the same fingerprint.

use crate::domain::{canonicalize, Record};
use crate::error::StoreError;

/// Fingerprint of a record slice that is already canonical.
pub fn fingerprint_canonical(records: &[Record]) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec(records)
        .map_err(|e| StoreError::storage("fingerprint serialization", e))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Fingerprint of arbitrary records; canonicalizes a copy first.
pub fn fingerprint(records: &[Record]) -> Result<String, StoreError> {
    let canonical = canonicalize(records.iter().cloned());
    fingerprint_canonical(&canonical)
}
