use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use super::{Store, StoreError};
use crate::domain::{
    AdminAccount, Alert, DailyAggregate, NewAlert, NewUser, Reading, ReadingQuery, Severity, User,
};

/// PostgreSQL-backed store.
///
/// Schema is expected to be applied out-of-band via `sql/schema/*.sql`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, name, consumer_number, phone_number, email, address, \
     approved_load_kw, approved_phase, is_installed, registration_date";

const READING_COLUMNS: &str = r#"id, user_id, "timestamp", voltage, current, power, daily_energy_kwh, monthly_energy_kwh"#;

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: String,
    user_id: Option<String>,
    severity: String,
    message: String,
    created_at: OffsetDateTime,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let severity: Severity = row.severity.parse().map_err(|message| StoreError::Malformed {
            path: format!("alerts/{}", row.id),
            message,
        })?;
        Ok(Alert {
            id: row.id,
            user_id: row.user_id,
            severity,
            message: row.message,
            created_at: Some(row.created_at),
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Store for PgStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY registration_date");
        let rows = sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_user_by_consumer_number(
        &self,
        consumer_number: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(btrim(consumer_number)) = lower($1)"
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(consumer_number.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let consumer_number = user.consumer_number.trim().to_string();
        let sql = format!(
            r#"
            INSERT INTO users (
                id, name, consumer_number, phone_number, email, address,
                approved_load_kw, approved_phase, is_installed, registration_date
            )
            VALUES (gen_random_uuid()::text, $1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            RETURNING {USER_COLUMNS}
            "#
        );

        let res = sqlx::query_as::<_, User>(&sql)
            .bind(&user.name)
            .bind(&consumer_number)
            .bind(&user.phone_number)
            .bind(&user.email)
            .bind(&user.address)
            .bind(user.approved_load_kw)
            .bind(&user.approved_phase)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await;

        match res {
            Ok(created) => Ok(created),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateConsumerNumber(consumer_number))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_installed(
        &self,
        user_id: &str,
        installed: bool,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("UPDATE users SET is_installed = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(installed)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO readings (id, user_id, "timestamp", voltage, current, power, daily_energy_kwh, monthly_energy_kwh)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, id) DO NOTHING
            "#,
        )
        .bind(&reading.id)
        .bind(&reading.user_id)
        .bind(reading.timestamp)
        .bind(reading.voltage)
        .bind(reading.current)
        .bind(reading.power)
        .bind(reading.daily_energy_kwh)
        .bind(reading.monthly_energy_kwh)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO latest_readings (user_id, id, "timestamp", voltage, current, power, daily_energy_kwh, monthly_energy_kwh)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                id = EXCLUDED.id,
                "timestamp" = EXCLUDED."timestamp",
                voltage = EXCLUDED.voltage,
                current = EXCLUDED.current,
                power = EXCLUDED.power,
                daily_energy_kwh = EXCLUDED.daily_energy_kwh,
                monthly_energy_kwh = EXCLUDED.monthly_energy_kwh
            WHERE latest_readings."timestamp" <= EXCLUDED."timestamp"
            "#,
        )
        .bind(&reading.user_id)
        .bind(&reading.id)
        .bind(reading.timestamp)
        .bind(reading.voltage)
        .bind(reading.current)
        .bind(reading.power)
        .bind(reading.daily_energy_kwh)
        .bind(reading.monthly_energy_kwh)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn readings(
        &self,
        user_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StoreError> {
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM readings
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR "timestamp" >= $2)
              AND ($3::timestamptz IS NULL OR "timestamp" <= $3)
            ORDER BY "timestamp"
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, Reading>(&sql)
            .bind(user_id)
            .bind(query.start)
            .bind(query.end)
            .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn latest_reading(&self, user_id: &str) -> Result<Option<Reading>, StoreError> {
        let sql = format!("SELECT {READING_COLUMNS} FROM latest_readings WHERE user_id = $1");
        let row = sqlx::query_as::<_, Reading>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn daily_aggregates(&self, user_id: &str) -> Result<Vec<DailyAggregate>, StoreError> {
        let rows = sqlx::query_as::<_, DailyAggregate>(
            "SELECT date, total_units FROM daily_data WHERE user_id = $1 ORDER BY date",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_daily_total(
        &self,
        user_id: &str,
        date: Date,
        total_units: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO daily_data (user_id, date, total_units)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, date) DO UPDATE
                SET total_units = GREATEST(daily_data.total_units, EXCLUDED.total_units)
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(total_units)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_alerts(&self, user_id: &str) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, user_id, severity, message, created_at FROM alerts WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn admin_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, user_id, severity, message, created_at FROM alerts ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn push_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO alerts (id, user_id, severity, message, created_at)
            VALUES (gen_random_uuid()::text, $1, $2, $3, $4)
            RETURNING id, user_id, severity, message, created_at
            "#,
        )
        .bind(&alert.user_id)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn count_user_alerts(&self, user_id: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn find_admin(&self, email: &str) -> Result<Option<AdminAccount>, StoreError> {
        let row = sqlx::query_as::<_, AdminAccount>(
            "SELECT email, password_hash FROM admin_accounts WHERE email = $1",
        )
        .bind(AdminAccount::normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_admin(&self, account: &AdminAccount) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO admin_accounts (email, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET password_hash = EXCLUDED.password_hash
            "#,
        )
        .bind(AdminAccount::normalize_email(&account.email))
        .bind(&account.password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
