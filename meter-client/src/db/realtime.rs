use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, OffsetDateTime, UtcOffset,
};

use super::{Store, StoreError};
use crate::domain::{
    lenient, AdminAccount, Alert, DailyAggregate, NewAlert, NewUser, Reading, ReadingQuery, User,
};

/// REST client for a Firebase-style realtime database.
///
/// Every node is addressed as `{base_url}/{path}.json`; filtered reads use
/// the `orderBy`/`equalTo`/`startAt`/`endAt`/`limitToFirst` parameters,
/// whose values must be JSON-encoded.
pub struct RealtimeStore {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RealtimeStore {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        let req = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => req.query(&[("auth", token.as_str())]),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Reads a node. Missing nodes come back as `Value::Null`.
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, StoreError> {
        self.send(self.request(Method::GET, path).query(params)).await
    }

    async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), StoreError> {
        self.send(self.request(Method::PUT, path).json(body)).await?;
        Ok(())
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<(), StoreError> {
        self.send(self.request(Method::PATCH, path).json(body)).await?;
        Ok(())
    }

    /// Appends under a generated push key and returns the key.
    async fn push<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<String, StoreError> {
        let resp = self.send(self.request(Method::POST, path).json(body)).await?;
        resp.get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Malformed {
                path: path.to_string(),
                message: "push response carried no key".to_string(),
            })
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.get(path, &[]).await? {
            Value::Null => Ok(None),
            v => decode(path, v).map(Some),
        }
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Flattens a node's children into `(key, value)` pairs. Sequential keys
/// may come back as a JSON array with null holes.
fn children(value: Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn quoted(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// UTC with nine fractional digits, so the server's string ordering of
/// `timestamp` matches time ordering.
const TIMESTAMP_KEY: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");

fn timestamp_key(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(TIMESTAMP_KEY)
        .or_else(|_| utc.format(&Rfc3339))
        .unwrap_or_else(|_| utc.to_string())
}

/// A reading as stored, with its timestamp in `timestamp_key` form.
fn reading_record(path: &str, reading: &Reading) -> Result<Value, StoreError> {
    let mut record = serde_json::to_value(reading).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    if let Value::Object(map) = &mut record {
        map.insert(
            "timestamp".to_string(),
            Value::String(timestamp_key(reading.timestamp)),
        );
    }
    Ok(record)
}

fn decode_users(value: Value) -> Result<Vec<User>, StoreError> {
    children(value)
        .into_iter()
        .map(|(key, v)| {
            let mut user: User = decode(&format!("users/{key}"), v)?;
            if user.id.is_empty() {
                user.id = key;
            }
            Ok(user)
        })
        .collect()
}

fn decode_alerts(path: &str, value: Value) -> Result<Vec<Alert>, StoreError> {
    let mut alerts = children(value)
        .into_iter()
        .map(|(key, v)| {
            let mut alert: Alert = decode(&format!("{path}/{key}"), v)?;
            if alert.id.is_empty() {
                alert.id = key;
            }
            Ok(alert)
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(alerts)
}

#[async_trait]
impl Store for RealtimeStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        decode_users(self.get("users", &[]).await?)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let user: Option<User> = self.get_one(&format!("users/{user_id}")).await?;
        Ok(user.map(|mut u| {
            if u.id.is_empty() {
                u.id = user_id.to_string();
            }
            u
        }))
    }

    async fn find_user_by_consumer_number(
        &self,
        consumer_number: &str,
    ) -> Result<Option<User>, StoreError> {
        // Older writers stored numbers as JSON numbers, which an `equalTo`
        // string filter would miss, so scan instead.
        Ok(self
            .list_users()
            .await?
            .into_iter()
            .find(|u| u.has_consumer_number(consumer_number)))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        // Not atomic: two concurrent registrations can both pass this check.
        if self
            .find_user_by_consumer_number(&user.consumer_number)
            .await?
            .is_some()
        {
            return Err(StoreError::DuplicateConsumerNumber(
                user.consumer_number.trim().to_string(),
            ));
        }

        let created = user.into_user(String::new(), OffsetDateTime::now_utc());
        let key = self.push("users", &created).await?;
        self.patch(&format!("users/{key}"), &json!({ "id": key }))
            .await?;

        tracing::info!(user_id = %key, "registered user");
        Ok(User { id: key, ..created })
    }

    async fn set_installed(
        &self,
        user_id: &str,
        installed: bool,
    ) -> Result<Option<User>, StoreError> {
        let Some(mut user) = self.get_user(user_id).await? else {
            return Ok(None);
        };
        self.patch(
            &format!("users/{user_id}"),
            &json!({ "isInstalled": installed }),
        )
        .await?;
        user.is_installed = installed;
        Ok(Some(user))
    }

    async fn append_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        let path = format!("readings/{}/{}", reading.user_id, reading.id);
        let record = reading_record(&path, reading)?;
        self.put(&path, &record).await?;

        let latest_path = format!("latest_readings/{}", reading.user_id);
        let current: Option<Reading> = self.get_one(&latest_path).await?;
        if current.map_or(true, |c| c.timestamp <= reading.timestamp) {
            self.put(&latest_path, &record).await?;
        }
        Ok(())
    }

    async fn readings(
        &self,
        user_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StoreError> {
        let path = format!("readings/{user_id}");
        let mut params = vec![
            ("orderBy", quoted("timestamp")),
            ("limitToFirst", query.limit.to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("startAt", quoted(&timestamp_key(start))));
        }
        if let Some(end) = query.end {
            params.push(("endAt", quoted(&timestamp_key(end))));
        }

        let raw = self.get(&path, &params).await?;
        let readings = children(raw)
            .into_iter()
            .map(|(key, v)| {
                let mut r: Reading = decode(&format!("{path}/{key}"), v)?;
                if r.id.is_empty() {
                    r.id = key;
                }
                if r.user_id.is_empty() {
                    r.user_id = user_id.to_string();
                }
                Ok(r)
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        // The server filters; ordering of the returned object is not kept.
        Ok(query.apply(readings))
    }

    async fn latest_reading(&self, user_id: &str) -> Result<Option<Reading>, StoreError> {
        self.get_one(&format!("latest_readings/{user_id}")).await
    }

    async fn daily_aggregates(&self, user_id: &str) -> Result<Vec<DailyAggregate>, StoreError> {
        let path = format!("daily_data/{user_id}");
        let raw = self.get(&path, &[]).await?;
        let mut days = Vec::new();
        for (key, v) in children(raw) {
            let entry_path = format!("{path}/{key}");
            let mut value = v;
            // Entries written without a `date` field are keyed by their day.
            if let Value::Object(map) = &mut value {
                map.entry("date").or_insert_with(|| Value::String(key.clone()));
            }
            days.push(decode::<DailyAggregate>(&entry_path, value)?);
        }
        DailyAggregate::sort_chronologically(&mut days);
        Ok(days)
    }

    async fn record_daily_total(
        &self,
        user_id: &str,
        date: Date,
        total_units: f64,
    ) -> Result<(), StoreError> {
        let path = format!("daily_data/{user_id}/{}", lenient::format_day(date));
        let current: Option<DailyAggregate> = self.get_one(&path).await?;
        if current.map_or(true, |c| total_units > c.total_units) {
            self.put(&path, &DailyAggregate { date, total_units }).await?;
        }
        Ok(())
    }

    async fn user_alerts(&self, user_id: &str) -> Result<Vec<Alert>, StoreError> {
        let path = format!("user_alerts/{user_id}");
        decode_alerts(&path, self.get(&path, &[]).await?)
    }

    async fn admin_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        decode_alerts("admin_alerts", self.get("admin_alerts", &[]).await?)
    }

    async fn push_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let draft = alert.into_alert(String::new(), OffsetDateTime::now_utc());
        let key = self.push("admin_alerts", &draft).await?;
        let alert = Alert { id: key, ..draft };

        self.put(&format!("admin_alerts/{}", alert.id), &alert).await?;
        if let Some(user_id) = &alert.user_id {
            self.put(&format!("user_alerts/{user_id}/{}", alert.id), &alert)
                .await?;
        }
        Ok(alert)
    }

    async fn count_user_alerts(&self, user_id: &str) -> Result<usize, StoreError> {
        // Shallow reads return only the child keys.
        let raw = self
            .get(&format!("user_alerts/{user_id}"), &[("shallow", "true".to_string())])
            .await?;
        Ok(children(raw).len())
    }

    async fn find_admin(&self, email: &str) -> Result<Option<AdminAccount>, StoreError> {
        self.get_one(&format!("admin/{}", AdminAccount::storage_key(email)))
            .await
    }

    async fn upsert_admin(&self, account: &AdminAccount) -> Result<(), StoreError> {
        let stored = AdminAccount {
            email: AdminAccount::normalize_email(&account.email),
            password_hash: account.password_hash.clone(),
        };
        self.put(
            &format!("admin/{}", AdminAccount::storage_key(&account.email)),
            &stored,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr, sync::Arc};

    use axum::{
        extract::{Path, Query, State},
        routing::get,
        Json, Router,
    };
    use time::macros::{date, datetime};
    use tokio::sync::Mutex;

    use super::*;
    use crate::domain::Severity;

    /// Just enough of the REST surface to exercise the client: a JSON tree
    /// with GET, PUT, PATCH and POST on arbitrary paths, `startAt`/`endAt`
    /// string filtering on the ordered child, and recorded query parameters.
    #[derive(Clone, Default)]
    struct FakeDb {
        root: Arc<Mutex<Value>>,
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
        pushes: Arc<Mutex<u64>>,
    }

    fn segments(path: &str) -> Vec<String> {
        path.trim_end_matches(".json")
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn node_at(root: &Value, segs: &[String]) -> Value {
        segs.iter()
            .try_fold(root, |node, seg| node.get(seg))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn set_at(root: &mut Value, segs: &[String], value: Value) {
        let mut node = root;
        for seg in segs {
            if !node.is_object() {
                *node = json!({});
            }
            let Value::Object(map) = node else { return };
            node = map.entry(seg.clone()).or_insert(Value::Null);
        }
        *node = value;
    }

    impl FakeDb {
        async fn seed(&self, path: &str, value: Value) {
            set_at(&mut *self.root.lock().await, &segments(path), value);
        }

        async fn read(&self, path: &str) -> Value {
            node_at(&*self.root.lock().await, &segments(path))
        }
    }

    fn bound(params: &HashMap<String, String>, name: &str) -> Option<String> {
        params
            .get(name)
            .and_then(|raw| serde_json::from_str::<String>(raw).ok())
    }

    async fn get_node(
        State(db): State<FakeDb>,
        Path(path): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        db.queries.lock().await.push(params.clone());
        let mut node = db.read(&path).await;

        if let (Some(field), Value::Object(map)) = (bound(&params, "orderBy"), &mut node) {
            let (start, end) = (bound(&params, "startAt"), bound(&params, "endAt"));
            map.retain(|_, child| {
                let Some(key) = child.get(&field).and_then(Value::as_str) else {
                    return false;
                };
                start.as_deref().map_or(true, |s| key >= s)
                    && end.as_deref().map_or(true, |e| key <= e)
            });
        }
        Json(node)
    }

    async fn put_node(
        State(db): State<FakeDb>,
        Path(path): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        db.seed(&path, body.clone()).await;
        Json(body)
    }

    async fn patch_node(
        State(db): State<FakeDb>,
        Path(path): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let base = segments(&path);
        if let Value::Object(fields) = &body {
            let mut root = db.root.lock().await;
            for (key, value) in fields {
                let mut segs = base.clone();
                segs.push(key.clone());
                set_at(&mut root, &segs, value.clone());
            }
        }
        Json(body)
    }

    async fn post_node(
        State(db): State<FakeDb>,
        Path(path): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let key = {
            let mut n = db.pushes.lock().await;
            *n += 1;
            format!("-Nk{:04}", *n)
        };
        let mut segs = segments(&path);
        segs.push(key.clone());
        set_at(&mut *db.root.lock().await, &segs, body);
        Json(json!({ "name": key }))
    }

    async fn spawn_fake(db: FakeDb) -> SocketAddr {
        let app = Router::new()
            .route(
                "/*path",
                get(get_node).put(put_node).patch(patch_node).post(post_node),
            )
            .with_state(db);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn store(addr: SocketAddr) -> RealtimeStore {
        RealtimeStore::new(
            format!("http://{addr}/"),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn new_user(consumer_number: &str) -> NewUser {
        NewUser {
            name: "Meera".to_string(),
            consumer_number: consumer_number.to_string(),
            phone_number: "9847012345".to_string(),
            email: None,
            address: Some("Kochi".to_string()),
            approved_load_kw: Some(3.0),
            approved_phase: Some("single".to_string()),
        }
    }

    #[test]
    fn children_skips_array_holes() {
        let out = children(json!([null, {"a": 1}, null, {"b": 2}]));
        let keys: Vec<_> = out.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["1", "3"]);
    }

    #[test]
    fn timestamp_keys_sort_like_time() {
        let whole = timestamp_key(datetime!(2024-06-01 23:59:59 UTC));
        let later = timestamp_key(datetime!(2024-06-01 23:59:59.5 UTC));
        let shifted = timestamp_key(datetime!(2024-06-02 03:00:00 +05:30));
        assert_eq!(whole, "2024-06-01T23:59:59.000000000Z");
        assert_eq!(shifted, "2024-06-01T21:30:00.000000000Z");
        assert!(whole < later);
        assert!(shifted < whole);
    }

    #[tokio::test]
    async fn consumer_lookup_matches_numeric_legacy_records() {
        let db = FakeDb::default();
        db.seed(
            "users",
            json!({
                "-Na1": {
                    "name": "Ravi",
                    "consumerNumber": 1155,
                    "phoneNumber": "9847012345",
                    "isInstalled": true,
                    "registration_date": "2024-02-01T10:00:00Z"
                }
            }),
        )
        .await;
        let addr = spawn_fake(db.clone()).await;
        let store = store(addr);

        let user = store
            .find_user_by_consumer_number(" 1155 ")
            .await
            .unwrap()
            .expect("user should match");
        assert_eq!(user.id, "-Na1");
        assert!(user.is_installed);

        let queries = db.queries.lock().await;
        assert_eq!(queries[0].get("auth").map(String::as_str), Some("secret"));
    }

    #[tokio::test]
    async fn create_user_assigns_push_key_and_rejects_duplicates() {
        let db = FakeDb::default();
        db.seed(
            "users/-Na1",
            json!({
                "name": "Ravi",
                "consumerNumber": 1155,
                "phoneNumber": "9847012345",
                "registration_date": "2024-02-01T10:00:00Z"
            }),
        )
        .await;
        let addr = spawn_fake(db.clone()).await;
        let store = store(addr);

        let err = store.create_user(new_user(" 1155 ")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateConsumerNumber(n) if n == "1155"));

        let created = store.create_user(new_user("2040")).await.unwrap();
        assert!(!created.is_installed);
        let stored = db.read(&format!("users/{}", created.id)).await;
        assert_eq!(stored["id"], created.id.as_str());
        assert_eq!(stored["consumerNumber"], "2040");

        assert_eq!(store.list_users().await.unwrap().len(), 2);
        let again = store.create_user(new_user("2040")).await.unwrap_err();
        assert!(matches!(again, StoreError::DuplicateConsumerNumber(_)));
    }

    #[tokio::test]
    async fn push_alert_writes_both_feeds_under_one_key() {
        let db = FakeDb::default();
        let addr = spawn_fake(db.clone()).await;
        let store = store(addr);

        let alert = store
            .push_alert(NewAlert {
                user_id: Some("u1".to_string()),
                severity: Severity::High,
                message: "Power draw 6.00 kW exceeds approved load of 5 kW".to_string(),
            })
            .await
            .unwrap();
        store
            .push_alert(NewAlert {
                user_id: None,
                severity: Severity::Low,
                message: "Feeder maintenance scheduled".to_string(),
            })
            .await
            .unwrap();

        let user_copy = db.read(&format!("user_alerts/u1/{}", alert.id)).await;
        assert_eq!(user_copy["id"], alert.id.as_str());
        assert_eq!(user_copy["severity"], "HIGH");

        let user_alerts = store.user_alerts("u1").await.unwrap();
        assert_eq!(user_alerts, vec![alert.clone()]);
        assert_eq!(store.count_user_alerts("u1").await.unwrap(), 1);
        assert_eq!(store.admin_alerts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn offset_readings_are_stored_in_utc_and_found_by_day() {
        let db = FakeDb::default();
        let addr = spawn_fake(db.clone()).await;
        let store = store(addr);
        let reading = Reading {
            id: "r1".to_string(),
            user_id: "u1".to_string(),
            timestamp: datetime!(2024-06-02 03:00:00 +05:30),
            voltage: 229.5,
            current: 4.0,
            power: 918.0,
            daily_energy_kwh: 2.5,
            monthly_energy_kwh: 40.0,
        };
        store.append_reading(&reading).await.unwrap();

        assert_eq!(
            db.read("readings/u1/r1").await["timestamp"],
            "2024-06-01T21:30:00.000000000Z"
        );
        assert_eq!(
            db.read("latest_readings/u1").await["timestamp"],
            "2024-06-01T21:30:00.000000000Z"
        );

        let utc_day = ReadingQuery {
            start: Some(datetime!(2024-06-01 00:00:00 UTC)),
            end: Some(datetime!(2024-06-01 23:59:59.999999999 UTC)),
            limit: 100,
        };
        let found = store.readings("u1", &utc_day).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].timestamp, reading.timestamp);

        let next_day = ReadingQuery {
            start: Some(datetime!(2024-06-02 00:00:00 UTC)),
            end: None,
            limit: 100,
        };
        assert!(store.readings("u1", &next_day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn daily_aggregates_fill_missing_date_from_key() {
        let db = FakeDb::default();
        db.seed(
            "daily_data/u1",
            json!({
                "2024-03-02": { "total_units": 6.5 },
                "2024-03-01": { "date": "2024-03-01", "total_units": 4.0 }
            }),
        )
        .await;
        let addr = spawn_fake(db).await;

        let days = store(addr).daily_aggregates("u1").await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].key(), "2024-03-01");
        assert_eq!(days[1].total_units, 6.5);
    }

    #[tokio::test]
    async fn reading_query_sends_json_encoded_bounds() {
        let db = FakeDb::default();
        let addr = spawn_fake(db.clone()).await;
        let query = ReadingQuery {
            start: Some(datetime!(2024-01-01 05:30:00 +05:30)),
            end: None,
            limit: 50,
        };

        let out = store(addr).readings("u1", &query).await.unwrap();
        assert!(out.is_empty());

        let queries = db.queries.lock().await;
        let q = &queries[0];
        assert_eq!(q.get("orderBy").map(String::as_str), Some("\"timestamp\""));
        assert_eq!(
            q.get("startAt").map(String::as_str),
            Some("\"2024-01-01T00:00:00.000000000Z\"")
        );
        assert_eq!(q.get("limitToFirst").map(String::as_str), Some("50"));
    }

    #[tokio::test]
    async fn record_daily_total_does_not_shrink_a_day() {
        let db = FakeDb::default();
        db.seed(
            "daily_data/u1/2024-03-01",
            json!({ "date": "2024-03-01", "total_units": 9.0 }),
        )
        .await;
        let addr = spawn_fake(db.clone()).await;
        let store = store(addr);

        store
            .record_daily_total("u1", date!(2024 - 03 - 01), 5.0)
            .await
            .unwrap();
        assert_eq!(db.read("daily_data/u1/2024-03-01").await["total_units"], 9.0);

        store
            .record_daily_total("u1", date!(2024 - 03 - 01), 11.0)
            .await
            .unwrap();
        assert_eq!(db.read("daily_data/u1/2024-03-01").await["total_units"], 11.0);
    }
}
