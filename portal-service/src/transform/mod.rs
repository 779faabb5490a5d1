use meter_client::domain::Reading;
use time::macros::datetime;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure validation of a meter `Reading`.
///
/// Rules:
/// - user_id must be non-empty.
/// - voltage, current, power and both energy counters must be finite and non-negative.
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading(env: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
    let r = &env.payload;

    if r.user_id.trim().is_empty() {
        return Err(PipelineError::Transform("user_id must not be empty".to_string()));
    }

    for (name, value) in [
        ("voltage", r.voltage),
        ("current", r.current),
        ("power", r.power),
        ("daily_energy_kwh", r.daily_energy_kwh),
        ("monthly_energy_kwh", r.monthly_energy_kwh),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(PipelineError::Transform(format!(
                "{name} must be non-negative"
            )));
        }
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if r.timestamp < min_ts || r.timestamp > max_ts {
        return Err(PipelineError::Transform("timestamp out of allowed range".to_string()));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<Reading, Reading> for ReadingValidation {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match validate_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
