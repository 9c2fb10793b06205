//! Sampling frequency of a dataset.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Determines both the on-disk partition and the calendar a series follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 3] = [Frequency::Daily, Frequency::Weekly, Frequency::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "d" | "1d" => Ok(Frequency::Daily),
            "weekly" | "w" | "1w" => Ok(Frequency::Weekly),
            "monthly" | "m" | "1mo" => Ok(Frequency::Monthly),
            _ => Err(StoreError::UnknownFrequency(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("daily".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert_eq!("Weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert_eq!("1mo".parse::<Frequency>().unwrap(), Frequency::Monthly);
    }

    #[test]
    fn unknown_frequency_is_a_validation_error() {
        let err = "hourly".parse::<Frequency>().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Frequency::Monthly).unwrap();
        assert_eq!(json, "\"monthly\"");
    }
}
