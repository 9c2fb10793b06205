//! Activity tiers and the refresh policy attached to each.

use crate::config::TierThresholds;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Active,
    Normal,
    Inactive,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Active, Tier::Normal, Tier::Inactive];

    /// Boundaries are inclusive on the lower edge: a total exactly equal to
    /// `thresholds.active` is active, exactly `thresholds.normal` is normal.
    pub fn from_score(total: f64, thresholds: &TierThresholds) -> Self {
        if total >= thresholds.active {
            Tier::Active
        } else if total >= thresholds.normal {
            Tier::Normal
        } else {
            Tier::Inactive
        }
    }

    /// Scheduling priority; higher runs first.
    pub fn priority_weight(self) -> u32 {
        match self {
            Tier::Active => 100,
            Tier::Normal => 50,
            Tier::Inactive => 10,
        }
    }

    /// Maximum age of stored data before a refresh is due.
    pub fn staleness_interval(self) -> Duration {
        match self {
            Tier::Active => Duration::hours(24),
            Tier::Normal => Duration::hours(168),
            Tier::Inactive => Duration::hours(720),
        }
    }

    pub fn update_frequency(self) -> &'static str {
        match self {
            Tier::Active => "daily",
            Tier::Normal => "weekly",
            Tier::Inactive => "monthly",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Active => "active",
            Tier::Normal => "normal",
            Tier::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_inclusive() {
        let t = TierThresholds::default();
        assert_eq!(Tier::from_score(85.0, &t), Tier::Active);
        assert_eq!(Tier::from_score(84.999, &t), Tier::Normal);
        assert_eq!(Tier::from_score(45.0, &t), Tier::Normal);
        assert_eq!(Tier::from_score(44.999, &t), Tier::Inactive);
        assert_eq!(Tier::from_score(0.0, &t), Tier::Inactive);
    }

    #[test]
    fn refresh_policy() {
        assert_eq!(Tier::Active.staleness_interval(), Duration::hours(24));
        assert_eq!(Tier::Normal.staleness_interval(), Duration::days(7));
        assert_eq!(Tier::Inactive.staleness_interval(), Duration::days(30));
        assert!(Tier::Active.priority_weight() > Tier::Normal.priority_weight());
        assert_eq!(Tier::Inactive.update_frequency(), "monthly");
    }
}
