use serde::{Deserialize, Serialize};
use time::Date;

use super::lenient;

/// Total units consumed by one user on one calendar day,
/// stored under `daily_data/{user_id}/{YYYY-MM-DD}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyAggregate {
    #[serde(with = "lenient::iso_date")]
    pub date: Date,
    pub total_units: f64,
}

impl DailyAggregate {
    pub fn key(&self) -> String {
        lenient::format_day(self.date)
    }

    /// Sorts ascending by date, the order every consumer expects.
    pub fn sort_chronologically(days: &mut [DailyAggregate]) {
        days.sort_by_key(|d| d.date);
    }
}
