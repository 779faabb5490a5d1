//! Where meter readings come from: the live HTTP endpoint or backfill files.

pub mod http_readings;
pub mod readings_csv_file;
pub mod readings_ndjson_file;

pub use http_readings::HttpReadingsSource;
pub use readings_csv_file::ReadingsCsvFileSource;
pub use readings_ndjson_file::ReadingsNdjsonFileSource;

use meter_client::domain::Reading;
use serde::Deserialize;
use time::OffsetDateTime;

/// Wire shape of a reading as posted by meters and written in backfill files.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingReading {
    #[serde(default)]
    pub id: Option<String>,
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

impl From<IncomingReading> for Reading {
    fn from(i: IncomingReading) -> Self {
        let mut reading = Reading {
            id: String::new(),
            user_id: i.user_id.trim().to_string(),
            timestamp: i.timestamp,
            voltage: i.voltage,
            current: i.current,
            power: i.power,
            daily_energy_kwh: i.daily_energy_kwh,
            monthly_energy_kwh: i.monthly_energy_kwh,
        };
        reading.id = match i.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => reading_id(&reading),
        };
        reading
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u32).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_f64(hasher: &mut blake3::Hasher, v: f64) {
    hasher.update(&v.to_bits().to_le_bytes());
}

/// Content digest of a reading, so the same sample ingested twice lands on
/// the same key.
pub fn reading_id(r: &Reading) -> String {
    let mut h = blake3::Hasher::new();
    hash_str(&mut h, &r.user_id);
    h.update(&r.timestamp.unix_timestamp_nanos().to_le_bytes());
    hash_f64(&mut h, r.voltage);
    hash_f64(&mut h, r.current);
    hash_f64(&mut h, r.power);
    hash_f64(&mut h, r.daily_energy_kwh);
    hash_f64(&mut h, r.monthly_energy_kwh);
    // 96 bits is plenty per user and keeps keys short.
    h.finalize().to_hex()[..24].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(power: f64) -> IncomingReading {
        serde_json::from_value(serde_json::json!({
            "user_id": " u-1 ",
            "timestamp": "2024-06-01T10:15:00+05:30",
            "voltage": 229.5,
            "current": 4.1,
            "power": power,
            "daily_energy_kwh": 3.2,
        }))
        .unwrap()
    }

    #[test]
    fn generated_ids_are_stable_and_content_sensitive() {
        let a: Reading = incoming(940.0).into();
        let b: Reading = incoming(940.0).into();
        let c: Reading = incoming(941.0).into();
        assert_eq!(a.user_id, "u-1");
        assert_eq!(a.id.len(), 24);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.monthly_energy_kwh, 0.0);
    }

    #[test]
    fn explicit_id_is_kept() {
        let mut i = incoming(940.0);
        i.id = Some("-NxYz".to_string());
        let r: Reading = i.into();
        assert_eq!(r.id, "-NxYz");
    }
}
