//! Energy-usage forecasting, delegated to an external ML service.
//!
//! The service is a black box: request bodies are small JSON objects keyed by
//! user id (or a window of daily history), and responses are passed through
//! to callers as opaque JSON.

mod client;
pub mod report;
pub mod window;

pub use client::ForecastClient;
pub use window::{Horizon, InsufficientHistory};

use async_trait::async_trait;
use meter_client::domain::DailyAggregate;
use serde_json::Value;

/// Days of history the service trains on when the caller does not say.
pub const DEFAULT_TRAINING_DAYS: u32 = 14;

/// Days ahead predicted when the caller does not say.
pub const DEFAULT_PREDICT_DAYS: u32 = 7;

#[derive(thiserror::Error, Debug)]
pub enum ForecastError {
    #[error("forecasting service unreachable: {0}")]
    Unreachable(String),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response from forecasting service: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Forecaster: Send + Sync {
    async fn health(&self) -> Result<Value, ForecastError>;

    async fn train(&self, user_id: &str, days: u32) -> Result<Value, ForecastError>;

    async fn predict_consumption(
        &self,
        user_id: &str,
        predict_days: u32,
    ) -> Result<Value, ForecastError>;

    /// Predicts from an explicit window of daily totals.
    async fn predict_from_history(
        &self,
        history: &[DailyAggregate],
        horizon: Horizon,
    ) -> Result<Value, ForecastError>;

    async fn detect_anomaly(&self, user_id: &str, current_power_w: f64)
        -> Result<Value, ForecastError>;

    async fn monthly_forecast(&self, user_id: &str) -> Result<Value, ForecastError>;
}
