use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::RwLock;

use super::{Store, StoreError};
use crate::domain::{
    AdminAccount, Alert, DailyAggregate, NewAlert, NewUser, Reading, ReadingQuery, User,
};

#[derive(Default)]
struct Inner {
    next_id: u64,
    users: BTreeMap<String, User>,
    readings: HashMap<String, BTreeMap<String, Reading>>,
    latest: HashMap<String, Reading>,
    daily: HashMap<String, BTreeMap<Date, f64>>,
    user_alerts: HashMap<String, Vec<Alert>>,
    admin_alerts: Vec<Alert>,
    admins: HashMap<String, AdminAccount>,
}

impl Inner {
    fn next_key(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:06}", self.next_id)
    }
}

/// Process-local store for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully formed user, bypassing registration.
    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.read().await.users.values().cloned().collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn find_user_by_consumer_number(
        &self,
        consumer_number: &str,
    ) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.has_consumer_number(consumer_number))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        // Check and insert under one write lock.
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.has_consumer_number(&user.consumer_number))
        {
            return Err(StoreError::DuplicateConsumerNumber(
                user.consumer_number.trim().to_string(),
            ));
        }

        let id = inner.next_key("user");
        let created = user.into_user(id.clone(), OffsetDateTime::now_utc());
        inner.users.insert(id, created.clone());
        Ok(created)
    }

    async fn set_installed(
        &self,
        user_id: &str,
        installed: bool,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(user_id).map(|u| {
            u.is_installed = installed;
            u.clone()
        }))
    }

    async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .readings
            .entry(reading.user_id.clone())
            .or_default()
            .entry(reading.id.clone())
            .or_insert_with(|| reading.clone());

        let newer = inner
            .latest
            .get(&reading.user_id)
            .map_or(true, |cur| cur.timestamp <= reading.timestamp);
        if newer {
            inner
                .latest
                .insert(reading.user_id.clone(), reading.clone());
        }
        Ok(())
    }

    async fn readings(
        &self,
        user_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StoreError> {
        let inner = self.inner.read().await;
        let all = inner
            .readings
            .get(user_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        Ok(query.apply(all))
    }

    async fn latest_reading(&self, user_id: &str) -> Result<Option<Reading>, StoreError> {
        Ok(self.inner.read().await.latest.get(user_id).cloned())
    }

    async fn daily_aggregates(&self, user_id: &str) -> Result<Vec<DailyAggregate>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .daily
            .get(user_id)
            .map(|days| {
                days.iter()
                    .map(|(date, total)| DailyAggregate {
                        date: *date,
                        total_units: *total,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn record_daily_total(
        &self,
        user_id: &str,
        date: Date,
        total_units: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .daily
            .entry(user_id.to_string())
            .or_default()
            .entry(date)
            .or_insert(total_units);
        if total_units > *slot {
            *slot = total_units;
        }
        Ok(())
    }

    async fn user_alerts(&self, user_id: &str) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .user_alerts
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn admin_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self.inner.read().await.admin_alerts.clone())
    }

    async fn push_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_key("alert");
        let alert = alert.into_alert(id, OffsetDateTime::now_utc());
        if let Some(user_id) = &alert.user_id {
            inner
                .user_alerts
                .entry(user_id.clone())
                .or_default()
                .push(alert.clone());
        }
        inner.admin_alerts.push(alert.clone());
        Ok(alert)
    }

    async fn find_admin(&self, email: &str) -> Result<Option<AdminAccount>, StoreError> {
        let key = AdminAccount::normalize_email(email);
        Ok(self.inner.read().await.admins.get(&key).cloned())
    }

    async fn upsert_admin(&self, account: &AdminAccount) -> Result<(), StoreError> {
        let key = AdminAccount::normalize_email(&account.email);
        let stored = AdminAccount {
            email: key.clone(),
            password_hash: account.password_hash.clone(),
        };
        self.inner.write().await.admins.insert(key, stored);
        Ok(())
    }
}
