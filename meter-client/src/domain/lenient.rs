//! Serde helpers for records written by older clients.
//!
//! The realtime database is schemaless, so identifiers such as consumer and
//! phone numbers show up as JSON numbers as often as strings.

use serde::{Deserialize, Deserializer, Serializer};
use time::{format_description::FormatItem, macros::format_description, Date};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Int(i64),
    Float(f64),
}

pub(crate) fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Text(s) => s,
        StringOrNumber::Int(n) => n.to_string(),
        StringOrNumber::Float(f) => f.to_string(),
    })
}

pub(crate) fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrNumber>::deserialize(deserializer)? {
        None => None,
        Some(StringOrNumber::Int(n)) => Some(n as f64),
        Some(StringOrNumber::Float(f)) => Some(f),
        Some(StringOrNumber::Text(s)) => s.trim().parse().ok(),
    })
}

const DAY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Calendar days as `YYYY-MM-DD`, the key format of `daily_data`.
pub(crate) mod iso_date {
    use super::*;

    pub fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = date.format(DAY).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_day(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parses the leading `YYYY-MM-DD` of a date or datetime string.
pub(crate) fn parse_day(raw: &str) -> Result<Date, time::error::Parse> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    Date::parse(head, DAY)
}

pub(crate) fn format_day(date: Date) -> String {
    date.format(DAY).unwrap_or_else(|_| date.to_string())
}
