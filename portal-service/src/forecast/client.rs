use std::time::{Duration, Instant};

use async_trait::async_trait;
use meter_client::domain::DailyAggregate;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use super::{ForecastError, Forecaster, Horizon};

/// HTTP client for the forecasting service.
///
/// Every call has the same fixed timeout and is attempted once.
#[derive(Clone)]
pub struct ForecastClient {
    http: Client,
    base_url: String,
}

impl ForecastClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ForecastError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForecastError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call(&self, endpoint: &'static str, req: RequestBuilder) -> Result<Value, ForecastError> {
        let started = Instant::now();
        let res = exchange(req).await;

        metrics::histogram!("forecast_request_seconds", "endpoint" => endpoint)
            .record(started.elapsed().as_secs_f64());
        let outcome = if res.is_ok() { "ok" } else { "error" };
        metrics::counter!("forecast_requests_total", "endpoint" => endpoint, "outcome" => outcome)
            .increment(1);

        if let Err(e) = &res {
            tracing::warn!(endpoint, error = %e, "forecasting call failed");
        }
        res
    }
}

async fn exchange(req: RequestBuilder) -> Result<Value, ForecastError> {
    let resp = req
        .send()
        .await
        .map_err(|e| ForecastError::Unreachable(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| ForecastError::Unreachable(e.to_string()))?;

    if !status.is_success() {
        // The service reports failures as `{ "error": "..." }`.
        let message = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("forecasting service returned {status}"));
        return Err(ForecastError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| ForecastError::Decode(e.to_string()))
}

#[async_trait]
impl Forecaster for ForecastClient {
    async fn health(&self) -> Result<Value, ForecastError> {
        self.call("health", self.http.get(self.url("/"))).await
    }

    async fn train(&self, user_id: &str, days: u32) -> Result<Value, ForecastError> {
        let body = json!({ "user_id": user_id, "days": days });
        self.call("train", self.http.post(self.url("/train")).json(&body))
            .await
    }

    async fn predict_consumption(
        &self,
        user_id: &str,
        predict_days: u32,
    ) -> Result<Value, ForecastError> {
        let body = json!({ "user_id": user_id, "predict_days": predict_days });
        self.call("predict", self.http.post(self.url("/predict")).json(&body))
            .await
    }

    async fn predict_from_history(
        &self,
        history: &[DailyAggregate],
        horizon: Horizon,
    ) -> Result<Value, ForecastError> {
        let body = json!({ "history": history, "prediction_type": horizon.as_str() });
        self.call("predict_history", self.http.post(self.url("/predict")).json(&body))
            .await
    }

    async fn detect_anomaly(
        &self,
        user_id: &str,
        current_power_w: f64,
    ) -> Result<Value, ForecastError> {
        let body = json!({ "user_id": user_id, "current_power_w": current_power_w });
        self.call(
            "detect_anomaly",
            self.http.post(self.url("/detect-anomaly")).json(&body),
        )
        .await
    }

    async fn monthly_forecast(&self, user_id: &str) -> Result<Value, ForecastError> {
        let body = json!({ "user_id": user_id });
        self.call(
            "monthly_forecast",
            self.http.post(self.url("/monthly-forecast")).json(&body),
        )
        .await
    }
}
