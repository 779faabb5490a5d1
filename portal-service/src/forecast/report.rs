//! Combined forecast views built from several forecasting calls.

use std::collections::BTreeMap;

use meter_client::domain::DailyAggregate;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::window::{most_recent, Horizon};
use super::{Forecaster, DEFAULT_PREDICT_DAYS};

/// Outcome of one horizon's prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HorizonOutcome {
    #[serde(rename_all = "camelCase")]
    Predicted {
        days_used: usize,
        input_count: usize,
        prediction: Value,
        confidence_percent: u8,
    },
    #[serde(rename_all = "camelCase")]
    Insufficient { error: String, available_days: usize },
    Failed { error: String, details: String },
}

impl HorizonOutcome {
    pub fn is_predicted(&self) -> bool {
        matches!(self, HorizonOutcome::Predicted { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionReport {
    pub user_id: String,
    pub available_days: usize,
    pub predictions: BTreeMap<Horizon, HorizonOutcome>,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

/// Maps the service's `confidence` label to a percentage; unknown labels read as low.
pub fn confidence_percent(prediction: &Value) -> u8 {
    match prediction.get("confidence").and_then(Value::as_str) {
        Some("high") => 95,
        Some("medium") => 75,
        _ => 50,
    }
}

/// Predicts every horizon from the user's daily history.
///
/// Horizons run concurrently and fail independently.
pub async fn predict_all(
    forecaster: &dyn Forecaster,
    user_id: &str,
    history: &[DailyAggregate],
) -> PredictionReport {
    let available = history.len();
    let outcomes = futures::future::join_all(
        Horizon::ALL
            .iter()
            .map(|&h| async move { (h, predict_horizon(forecaster, history, h).await) }),
    )
    .await;

    PredictionReport {
        user_id: user_id.to_string(),
        available_days: available,
        predictions: outcomes.into_iter().collect(),
        generated_at: OffsetDateTime::now_utc(),
    }
}

pub async fn predict_horizon(
    forecaster: &dyn Forecaster,
    history: &[DailyAggregate],
    horizon: Horizon,
) -> HorizonOutcome {
    let days_used = match horizon.select_window(history.len()) {
        Ok(n) => n,
        Err(e) => {
            return HorizonOutcome::Insufficient {
                error: e.to_string(),
                available_days: e.available,
            }
        }
    };

    let window = most_recent(history, days_used);
    match forecaster.predict_from_history(&window, horizon).await {
        Ok(prediction) => HorizonOutcome::Predicted {
            days_used,
            input_count: window.len(),
            confidence_percent: confidence_percent(&prediction),
            prediction,
        },
        Err(e) => HorizonOutcome::Failed {
            error: format!("Failed to generate {horizon} prediction"),
            details: e.to_string(),
        },
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightParts {
    pub weekly_prediction: Option<Value>,
    pub monthly_forecast: Option<Value>,
    pub current_anomaly: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightErrors {
    pub weekly_prediction: Option<String>,
    pub monthly_forecast: Option<String>,
    pub current_anomaly: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub user_id: String,
    pub insights: InsightParts,
    pub errors: InsightErrors,
}

/// Weekly prediction, monthly forecast and, when `current_power_w` is given,
/// an anomaly check, fetched concurrently. Each part carries data or an error.
pub async fn gather_insights(
    forecaster: &dyn Forecaster,
    user_id: &str,
    current_power_w: Option<f64>,
) -> Insights {
    let anomaly = async {
        match current_power_w {
            Some(power) => Some(forecaster.detect_anomaly(user_id, power).await),
            None => None,
        }
    };
    let (weekly, monthly, anomaly) = tokio::join!(
        forecaster.predict_consumption(user_id, DEFAULT_PREDICT_DAYS),
        forecaster.monthly_forecast(user_id),
        anomaly,
    );

    let mut insights = InsightParts::default();
    let mut errors = InsightErrors::default();

    match weekly {
        Ok(v) => insights.weekly_prediction = Some(v),
        Err(e) => errors.weekly_prediction = Some(e.to_string()),
    }
    match monthly {
        Ok(v) => insights.monthly_forecast = Some(v),
        Err(e) => errors.monthly_forecast = Some(e.to_string()),
    }
    match anomaly {
        Some(Ok(v)) => insights.current_anomaly = Some(v),
        Some(Err(e)) => errors.current_anomaly = Some(e.to_string()),
        None => {}
    }

    Insights {
        user_id: user_id.to_string(),
        insights,
        errors,
    }
}
