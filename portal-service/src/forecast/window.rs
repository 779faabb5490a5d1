//! How much history each forecast horizon sends to the forecasting service.

use std::fmt;

use meter_client::domain::DailyAggregate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Take {
    Exactly(usize),
    All,
}

/// Chosen when at least `min` days are available.
#[derive(Debug, Clone, Copy)]
struct Tier {
    min: usize,
    take: Take,
}

const fn tier(min: usize, take: Take) -> Tier {
    Tier { min, take }
}

// Evaluated top to bottom; the first satisfied tier wins.
const DAILY: [Tier; 4] = [
    tier(30, Take::Exactly(30)),
    tier(14, Take::Exactly(14)),
    tier(7, Take::Exactly(7)),
    tier(3, Take::Exactly(3)),
];

const WEEKLY: [Tier; 4] = [
    tier(30, Take::Exactly(30)),
    tier(21, Take::Exactly(21)),
    tier(14, Take::Exactly(14)),
    tier(7, Take::All),
];

const MONTHLY: [Tier; 4] = [
    tier(60, Take::Exactly(60)),
    tier(45, Take::Exactly(45)),
    tier(30, Take::Exactly(30)),
    tier(14, Take::All),
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Not enough data for {horizon} prediction (minimum {required} days required)")]
pub struct InsufficientHistory {
    pub horizon: Horizon,
    pub required: usize,
    pub available: usize,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Daily, Horizon::Weekly, Horizon::Monthly];

    pub fn as_str(self) -> &'static str {
        match self {
            Horizon::Daily => "daily",
            Horizon::Weekly => "weekly",
            Horizon::Monthly => "monthly",
        }
    }

    fn tiers(self) -> &'static [Tier] {
        match self {
            Horizon::Daily => &DAILY,
            Horizon::Weekly => &WEEKLY,
            Horizon::Monthly => &MONTHLY,
        }
    }

    pub fn minimum_days(self) -> usize {
        self.tiers().last().map_or(0, |t| t.min)
    }

    /// Number of most recent days to send, given `available` days of history.
    pub fn select_window(self, available: usize) -> Result<usize, InsufficientHistory> {
        self.tiers()
            .iter()
            .find(|t| available >= t.min)
            .map(|t| match t.take {
                Take::Exactly(n) => n,
                Take::All => available,
            })
            .ok_or(InsufficientHistory {
                horizon: self,
                required: self.minimum_days(),
                available,
            })
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `n` most recent days, newest first.
pub fn most_recent(days: &[DailyAggregate], n: usize) -> Vec<DailyAggregate> {
    let mut sorted = days.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    sorted.truncate(n);
    sorted
}
