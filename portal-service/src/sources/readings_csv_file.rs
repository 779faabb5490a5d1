use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use meter_client::domain::Reading;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::IncomingReading;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV backfill with a header row.
///
/// Required columns: `user_id`, `timestamp` (RFC 3339), `voltage`, `current`,
/// `power`. Optional: `id`, `daily_energy_kwh`, `monthly_energy_kwh`.
pub struct ReadingsCsvFileSource {
    path: PathBuf,
}

impl ReadingsCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn column<'r>(
    record: &'r StringRecord,
    headers: &StringRecord,
    name: &str,
) -> Option<&'r str> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .and_then(|idx| record.get(idx))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required<'r>(
    record: &'r StringRecord,
    headers: &StringRecord,
    name: &str,
) -> Result<&'r str, PipelineError> {
    column(record, headers, name)
        .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
}

fn float(raw: &str, name: &str) -> Result<f64, PipelineError> {
    raw.parse()
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{raw}': {e}")))
}

fn record_to_reading(record: &StringRecord, headers: &StringRecord) -> Result<Reading, PipelineError> {
    let ts = required(record, headers, "timestamp")?;
    let timestamp = OffsetDateTime::parse(ts, &Rfc3339)
        .map_err(|e| PipelineError::Source(format!("invalid timestamp '{ts}': {e}")))?;

    let optional = |name: &str| -> Result<f64, PipelineError> {
        column(record, headers, name).map_or(Ok(0.0), |v| float(v, name))
    };

    let incoming = IncomingReading {
        id: column(record, headers, "id").map(str::to_string),
        user_id: required(record, headers, "user_id")?.to_string(),
        timestamp,
        voltage: float(required(record, headers, "voltage")?, "voltage")?,
        current: float(required(record, headers, "current")?, "current")?,
        power: float(required(record, headers, "power")?, "power")?,
        daily_energy_kwh: optional("daily_energy_kwh")?,
        monthly_energy_kwh: optional("monthly_energy_kwh")?,
    };
    Ok(incoming.into())
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingsCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        // Blocking reader inside one task; backfill files are read once, front to back.
        let path = self.path.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| PipelineError::Source(format!("failed to open CSV file: {e}")))?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();

            for result in rdr.records() {
                let record = result.map_err(|e| PipelineError::Source(format!(
                    "failed to read CSV record: {e}"
                )))?;

                let reading = match record_to_reading(&record, &headers) {
                    Ok(r) => r,
                    Err(e) => {
                        metrics::counter!("backfill_reading_parse_errors_total").increment(1);
                        Err(e)?
                    }
                };

                yield Envelope::now(reading);
            }
        };

        Box::pin(s)
    }
}
