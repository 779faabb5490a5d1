//! HTTP surface of the portal.

mod admin;
mod ml;
mod user;

use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::get,
    Json, Router,
};
use meter_client::domain::{ReadingQuery, DEFAULT_READING_LIMIT};
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .nest("/user", user::routes())
        .nest("/admin", admin::routes())
        .nest("/api/ml", ml::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `?start&end&limit` for reading history. Bounds accept RFC 3339 timestamps
/// or plain `YYYY-MM-DD` days; a plain `end` day includes the whole day.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReadingParams {
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
}

impl ReadingParams {
    pub(crate) fn into_query(self) -> Result<ReadingQuery, AppError> {
        let start = self
            .start
            .as_deref()
            .map(|s| parse_bound(s, false))
            .transpose()?;
        let end = self
            .end
            .as_deref()
            .map(|s| parse_bound(s, true))
            .transpose()?;
        Ok(ReadingQuery {
            start,
            end,
            limit: self.limit.unwrap_or(DEFAULT_READING_LIMIT),
        })
    }
}

fn parse_bound(raw: &str, end_of_day: bool) -> Result<OffsetDateTime, AppError> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(ts);
    }
    let day = Date::parse(raw, time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|_| AppError::Validation(format!("invalid date '{raw}'")))?;
    let query = crate::views::day_query(day);
    let bound = if end_of_day { query.end } else { query.start };
    bound.ok_or_else(|| AppError::Validation(format!("invalid date '{raw}'")))
}

/// Accepts identifiers sent either as strings or numbers; blank is absent.
pub(crate) fn text(value: Option<Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

pub(crate) fn number(value: Option<Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
