//! Typed repository over the portal's hierarchical data.
//!
//! `Store` mirrors the logical layout (`users`, `readings/{user}`,
//! `latest_readings/{user}`, `daily_data/{user}`, `user_alerts/{user}`,
//! `admin_alerts`, `admin`) without exposing path strings to callers.

mod memory;
mod postgres;
mod realtime;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use realtime::RealtimeStore;

use async_trait::async_trait;
use time::Date;

use crate::domain::{
    AdminAccount, Alert, DailyAggregate, NewAlert, NewUser, Reading, ReadingQuery, User,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("consumer number {0} is already registered")]
    DuplicateConsumerNumber(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("realtime database request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("realtime database returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed record at {path}: {message}")]
    Malformed { path: String, message: String },
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Lookup by consumer number, trimmed and ASCII case-insensitive.
    async fn find_user_by_consumer_number(
        &self,
        consumer_number: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Fails with `DuplicateConsumerNumber` when the number is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Returns `None` when the user does not exist.
    async fn set_installed(&self, user_id: &str, installed: bool)
        -> Result<Option<User>, StoreError>;

    /// Stores the reading under its id (re-appending the same id is a no-op)
    /// and advances `latest_readings` when the reading is newer.
    async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Readings ordered by timestamp, filtered and truncated by `query`.
    async fn readings(&self, user_id: &str, query: &ReadingQuery)
        -> Result<Vec<Reading>, StoreError>;

    async fn latest_reading(&self, user_id: &str) -> Result<Option<Reading>, StoreError>;

    /// Daily totals ordered ascending by date.
    async fn daily_aggregates(&self, user_id: &str) -> Result<Vec<DailyAggregate>, StoreError>;

    /// Records a day's cumulative total, keeping the larger of the stored and
    /// the new value so out-of-order readings never shrink a day.
    async fn record_daily_total(
        &self,
        user_id: &str,
        date: Date,
        total_units: f64,
    ) -> Result<(), StoreError>;

    async fn user_alerts(&self, user_id: &str) -> Result<Vec<Alert>, StoreError>;

    async fn admin_alerts(&self) -> Result<Vec<Alert>, StoreError>;

    /// Writes to the admin feed and, for user alerts, the user's feed.
    async fn push_alert(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    async fn count_user_alerts(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self.user_alerts(user_id).await?.len())
    }

    async fn find_admin(&self, email: &str) -> Result<Option<AdminAccount>, StoreError>;

    async fn upsert_admin(&self, account: &AdminAccount) -> Result<(), StoreError>;
}
