use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::StreamExt;
use meter_client::db::{Store, StoreError};
use meter_client::domain::{NewAlert, Reading};

use super::alert_rules;
use crate::pipeline::{Envelope, PipelineError, Sink};

/// Persists readings through the repository: the reading itself, the
/// latest-reading pointer and the day's cumulative total. Alert rules run
/// once a batch is durable.
pub struct StoreSink {
    store: Arc<dyn Store>,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl StoreSink {
    pub fn new(
        store: Arc<dyn Store>,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    /// Writes one batch, retrying with linear backoff. A batch that still
    /// fails after `max_retries` is logged and dropped so the stream keeps
    /// flowing.
    async fn flush_batch(&self, batch: &[Envelope<Reading>]) {
        if batch.is_empty() {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            match self.write_batch(batch).await {
                Ok(()) => {
                    metrics::counter!("ingest_readings_total").increment(batch.len() as u64);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("ingest_end_to_end_latency_seconds")
                                .record(dur.as_secs_f64());
                        }
                    }
                    break;
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "store sink flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        dropped = batch.len(),
                        "store sink flush failed, dropping batch"
                    );
                    metrics::counter!("ingest_sink_errors_total").increment(1);
                    return;
                }
            }
        }

        self.raise_alerts(batch).await;
    }

    /// Idempotent, so a retried batch rewrites the same keys.
    async fn write_batch(&self, batch: &[Envelope<Reading>]) -> Result<(), StoreError> {
        for env in batch {
            let r = &env.payload;
            self.store.append_reading(r).await?;
            self.store
                .record_daily_total(&r.user_id, r.day(), r.daily_energy_kwh)
                .await?;
        }
        Ok(())
    }

    async fn raise_alerts(&self, batch: &[Envelope<Reading>]) {
        let mut loads: HashMap<&str, Option<f64>> = HashMap::new();

        for env in batch {
            let r = &env.payload;
            let cached = loads.get(r.user_id.as_str()).copied();
            let load = match cached {
                Some(load) => load,
                None => {
                    let load = match self.store.get_user(&r.user_id).await {
                        Ok(user) => user.and_then(|u| u.approved_load_kw),
                        Err(e) => {
                            tracing::warn!(error = %e, user_id = %r.user_id, "approved load lookup failed");
                            None
                        }
                    };
                    loads.insert(r.user_id.as_str(), load);
                    load
                }
            };

            for alert in alert_rules::evaluate(r, load) {
                self.push_alert(alert).await;
            }
        }
    }

    async fn push_alert(&self, alert: NewAlert) {
        let severity = alert.severity.as_str();
        match self.store.push_alert(alert).await {
            Ok(a) => {
                metrics::counter!("ingest_alerts_raised_total", "severity" => severity).increment(1);
                tracing::info!(alert_id = %a.id, user_id = ?a.user_id, severity, "alert raised");
            }
            Err(e) => tracing::error!(error = %e, "failed to store alert"),
        }
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for StoreSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<Reading>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "dropping reading rejected upstream");
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                self.flush_batch(&buffer).await;
                buffer.clear();
            }
        }

        self.flush_batch(&buffer).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use meter_client::db::MemoryStore;
    use meter_client::domain::{
        AdminAccount, Alert, DailyAggregate, NewUser, ReadingQuery, Severity, User,
    };
    use time::Date;
    use time::macros::{date, datetime};
    use time::OffsetDateTime;

    use super::*;
    use crate::pipeline::Pipeline;
    use crate::sources::reading_id;
    use crate::transform::ReadingValidation;

    fn reading(ts: OffsetDateTime, voltage: f64, power: f64, daily: f64) -> Envelope<Reading> {
        let mut r = Reading {
            id: String::new(),
            user_id: "u-1".into(),
            timestamp: ts,
            voltage,
            current: 1.0,
            power,
            daily_energy_kwh: daily,
            monthly_energy_kwh: daily,
        };
        r.id = reading_id(&r);
        Envelope::now(r)
    }

    struct Fixed(Vec<Result<Envelope<Reading>, PipelineError>>);

    #[async_trait::async_trait]
    impl crate::pipeline::Source<Reading> for Fixed {
        async fn stream(&self) -> crate::pipeline::EnvelopeStream<Reading> {
            let items: Vec<_> = self
                .0
                .iter()
                .map(|i| match i {
                    Ok(env) => Ok(env.clone()),
                    Err(e) => Err(PipelineError::Source(e.to_string())),
                })
                .collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    async fn store_with_user() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_user(User {
                id: "u-1".into(),
                name: "Anil".into(),
                consumer_number: "1155".into(),
                phone_number: "9847012345".into(),
                email: None,
                address: None,
                approved_load_kw: Some(3.0),
                approved_phase: None,
                is_installed: true,
                registration_date: datetime!(2024-01-01 00:00:00 UTC),
            })
            .await;
        store
    }

    #[tokio::test]
    async fn pipeline_persists_readings_totals_and_alerts() {
        let store = store_with_user().await;
        let sink = StoreSink::new(store.clone(), 2, 0, Duration::from_millis(1));
        let source = Fixed(vec![
            Ok(reading(datetime!(2024-05-01 08:00:00 UTC), 230.0, 1200.0, 1.5)),
            Ok(reading(datetime!(2024-05-01 09:00:00 UTC), 231.0, 3500.0, 4.0)),
            Err(PipelineError::Source("garbled line".into())),
            Ok(reading(datetime!(2024-05-01 07:00:00 UTC), 190.0, 500.0, 0.9)),
            Ok(reading(datetime!(2024-05-02 01:00:00 UTC), 229.0, 2800.0, 0.2)),
            Ok(reading(datetime!(2024-05-02 02:00:00 UTC), 229.0, -5.0, 0.3)),
        ]);

        Pipeline::new(source, sink)
            .with_transform(ReadingValidation)
            .run()
            .await
            .unwrap();

        let stored = store.readings("u-1", &ReadingQuery::default()).await.unwrap();
        assert_eq!(stored.len(), 4);

        let latest = store.latest_reading("u-1").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, datetime!(2024-05-02 01:00:00 UTC));

        let days = store.daily_aggregates("u-1").await.unwrap();
        let totals: Vec<_> = days.iter().map(|d| (d.date, d.total_units)).collect();
        assert_eq!(
            totals,
            vec![(date!(2024 - 05 - 01), 4.0), (date!(2024 - 05 - 02), 0.2)]
        );

        let mut severities: Vec<_> = store
            .user_alerts("u-1")
            .await
            .unwrap()
            .iter()
            .map(|a| a.severity)
            .collect();
        severities.sort_by_key(|s| s.as_str());
        assert_eq!(
            severities,
            vec![Severity::High, Severity::Low, Severity::Medium]
        );
        assert_eq!(store.admin_alerts().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reingesting_the_same_readings_is_idempotent() {
        let store = store_with_user().await;
        let batch = || {
            Fixed(vec![
                Ok(reading(datetime!(2024-05-01 08:00:00 UTC), 230.0, 100.0, 1.0)),
                Ok(reading(datetime!(2024-05-01 09:00:00 UTC), 230.0, 100.0, 2.0)),
            ])
        };

        for _ in 0..2 {
            let sink = StoreSink::new(store.clone(), 10, 0, Duration::from_millis(1));
            Pipeline::new(batch(), sink).run().await.unwrap();
        }

        let stored = store.readings("u-1", &ReadingQuery::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        let days = store.daily_aggregates("u-1").await.unwrap();
        assert_eq!(days[0].total_units, 2.0);
    }

    /// Rejects the first `failures` reading writes, then behaves like the
    /// wrapped store.
    struct Outage {
        inner: Arc<MemoryStore>,
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Store for Outage {
        async fn list_users(&self) -> Result<Vec<User>, StoreError> {
            self.inner.list_users().await
        }

        async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
            self.inner.get_user(user_id).await
        }

        async fn find_user_by_consumer_number(
            &self,
            consumer_number: &str,
        ) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_consumer_number(consumer_number).await
        }

        async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
            self.inner.create_user(user).await
        }

        async fn set_installed(
            &self,
            user_id: &str,
            installed: bool,
        ) -> Result<Option<User>, StoreError> {
            self.inner.set_installed(user_id, installed).await
        }

        async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError> {
            let down = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if down {
                return Err(StoreError::Status {
                    status: 503,
                    body: "service unavailable".into(),
                });
            }
            self.inner.append_reading(reading).await
        }

        async fn readings(
            &self,
            user_id: &str,
            query: &ReadingQuery,
        ) -> Result<Vec<Reading>, StoreError> {
            self.inner.readings(user_id, query).await
        }

        async fn latest_reading(&self, user_id: &str) -> Result<Option<Reading>, StoreError> {
            self.inner.latest_reading(user_id).await
        }

        async fn daily_aggregates(&self, user_id: &str) -> Result<Vec<DailyAggregate>, StoreError> {
            self.inner.daily_aggregates(user_id).await
        }

        async fn record_daily_total(
            &self,
            user_id: &str,
            date: Date,
            total_units: f64,
        ) -> Result<(), StoreError> {
            self.inner.record_daily_total(user_id, date, total_units).await
        }

        async fn user_alerts(&self, user_id: &str) -> Result<Vec<Alert>, StoreError> {
            self.inner.user_alerts(user_id).await
        }

        async fn admin_alerts(&self) -> Result<Vec<Alert>, StoreError> {
            self.inner.admin_alerts().await
        }

        async fn push_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
            self.inner.push_alert(alert).await
        }

        async fn find_admin(&self, email: &str) -> Result<Option<AdminAccount>, StoreError> {
            self.inner.find_admin(email).await
        }

        async fn upsert_admin(&self, account: &AdminAccount) -> Result<(), StoreError> {
            self.inner.upsert_admin(account).await
        }
    }

    #[tokio::test]
    async fn store_outage_drops_the_batch_and_keeps_consuming() {
        let inner = store_with_user().await;
        let store = Arc::new(Outage {
            inner: inner.clone(),
            failures: AtomicUsize::new(2),
        });
        // One retry per batch: the first batch fails twice and is dropped.
        let sink = StoreSink::new(store, 1, 1, Duration::from_millis(1));
        let source = Fixed(vec![
            Ok(reading(datetime!(2024-05-01 08:00:00 UTC), 230.0, 3500.0, 1.0)),
            Ok(reading(datetime!(2024-05-01 09:00:00 UTC), 230.0, 400.0, 2.0)),
            Ok(reading(datetime!(2024-05-01 10:00:00 UTC), 230.0, 500.0, 3.0)),
        ]);

        Pipeline::new(source, sink).run().await.unwrap();

        let stored = inner.readings("u-1", &ReadingQuery::default()).await.unwrap();
        let hours: Vec<_> = stored.iter().map(|r| r.timestamp.hour()).collect();
        assert_eq!(hours, vec![9, 10]);
        assert_eq!(inner.daily_aggregates("u-1").await.unwrap()[0].total_units, 3.0);
        // The dropped reading breached the load but raised nothing.
        assert!(inner.user_alerts("u-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_within_retries_still_persists() {
        let inner = store_with_user().await;
        let store = Arc::new(Outage {
            inner: inner.clone(),
            failures: AtomicUsize::new(2),
        });
        let sink = StoreSink::new(store, 10, 3, Duration::from_millis(1));
        let source = Fixed(vec![Ok(reading(
            datetime!(2024-05-01 08:00:00 UTC),
            230.0,
            3500.0,
            1.0,
        ))]);

        Pipeline::new(source, sink).run().await.unwrap();

        assert!(inner.latest_reading("u-1").await.unwrap().is_some());
        assert_eq!(inner.user_alerts("u-1").await.unwrap().len(), 1);
    }
}
