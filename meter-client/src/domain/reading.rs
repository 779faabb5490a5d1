use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

/// Default page size for reading history queries.
pub const DEFAULT_READING_LIMIT: usize = 2000;

/// One meter sample, stored under `readings/{user_id}/{id}`.
///
/// `daily_energy_kwh` and `monthly_energy_kwh` are cumulative counters that
/// reset at the start of each day and month respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    #[serde(default)]
    pub daily_energy_kwh: f64,
    #[serde(default)]
    pub monthly_energy_kwh: f64,
}

impl Reading {
    /// The UTC calendar day this reading belongs to.
    pub fn day(&self) -> Date {
        self.timestamp.to_offset(UtcOffset::UTC).date()
    }
}

/// Time-range filter for reading history. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingQuery {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub limit: usize,
}

impl Default for ReadingQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: DEFAULT_READING_LIMIT,
        }
    }
}

impl ReadingQuery {
    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }

    /// Orders by timestamp, filters to the range and truncates to the limit.
    pub fn apply(&self, mut readings: Vec<Reading>) -> Vec<Reading> {
        readings.retain(|r| self.contains(r.timestamp));
        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        readings.truncate(self.limit);
        readings
    }
}
