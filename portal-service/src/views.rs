//! JSON shapes returned by the dashboard endpoints.

use meter_client::domain::{DailyAggregate, Reading, ReadingQuery, User, DEFAULT_READING_LIMIT};
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, Time};

/// The last `n` entries of an ascending series.
pub fn trailing(days: &[DailyAggregate], n: usize) -> Vec<DailyAggregate> {
    days[days.len().saturating_sub(n)..].to_vec()
}

/// Readings that fall on the given UTC day.
pub fn day_query(day: Date) -> ReadingQuery {
    let start = day.with_time(Time::MIDNIGHT).assume_utc();
    ReadingQuery {
        start: Some(start),
        end: Some(start + Duration::days(1) - Duration::nanoseconds(1)),
        limit: DEFAULT_READING_LIMIT,
    }
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDashboard {
    pub daily_trend: Vec<DailyAggregate>,
    /// Newest entry of the trend.
    pub latest_reading: Option<DailyAggregate>,
    pub today_readings: Vec<Reading>,
}

impl UserDashboard {
    pub fn build(daily: &[DailyAggregate], today_readings: Vec<Reading>) -> Self {
        let daily_trend = trailing(daily, 7);
        Self {
            latest_reading: daily_trend.last().cloned(),
            daily_trend,
            today_readings,
        }
    }
}

/// Trend windows for the per-user usage summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub week: Vec<DailyAggregate>,
    pub ten_days: Vec<DailyAggregate>,
    pub two_weeks: Vec<DailyAggregate>,
    pub month: Vec<DailyAggregate>,
    pub today: Vec<Reading>,
}

impl DailySummary {
    pub fn build(daily: &[DailyAggregate], today: Vec<Reading>) -> Self {
        Self {
            week: trailing(daily, 7),
            ten_days: trailing(daily, 10),
            two_weeks: trailing(daily, 14),
            month: trailing(daily, 30),
            today,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    pub users: Vec<User>,
    pub total_users: usize,
    pub total_alerts: usize,
    pub ml_service_online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn series(n: usize) -> Vec<DailyAggregate> {
        let start = date!(2024 - 02 - 01);
        (0..n)
            .map(|i| DailyAggregate {
                date: start + Duration::days(i as i64),
                total_units: i as f64,
            })
            .collect()
    }

    #[test]
    fn trailing_keeps_newest_in_ascending_order() {
        let out = trailing(&series(10), 3);
        let dates: Vec<_> = out.iter().map(|d| d.date).collect();
        assert_eq!(
            dates,
            vec![date!(2024 - 02 - 08), date!(2024 - 02 - 09), date!(2024 - 02 - 10)]
        );
        assert_eq!(trailing(&series(2), 7).len(), 2);
    }

    #[test]
    fn dashboard_latest_is_last_trend_day() {
        let dash = UserDashboard::build(&series(9), Vec::new());
        assert_eq!(dash.daily_trend.len(), 7);
        assert_eq!(dash.latest_reading.unwrap().date, date!(2024 - 02 - 09));

        let empty = UserDashboard::build(&[], Vec::new());
        assert!(empty.latest_reading.is_none());
    }

    #[test]
    fn summary_windows() {
        let s = DailySummary::build(&series(12), Vec::new());
        assert_eq!(s.week.len(), 7);
        assert_eq!(s.ten_days.len(), 10);
        assert_eq!(s.two_weeks.len(), 12);
        assert_eq!(s.month.len(), 12);

        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("tenDays").is_some());
        assert!(json.get("twoWeeks").is_some());
    }

    #[test]
    fn day_query_covers_whole_utc_day() {
        let q = day_query(date!(2024 - 03 - 10));
        assert!(q.contains(datetime!(2024-03-10 00:00:00 UTC)));
        assert!(q.contains(datetime!(2024-03-10 23:59:59 UTC)));
        assert!(!q.contains(datetime!(2024-03-11 00:00:00 UTC)));
        assert!(!q.contains(datetime!(2024-03-09 23:59:59 UTC)));
    }
}
