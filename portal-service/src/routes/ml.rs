//! Pass-through access to the forecasting service for administrators.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::user::InsightParams;
use super::{number, text};
use crate::auth::AdminSession;
use crate::error::AppError;
use crate::forecast::{report, DEFAULT_PREDICT_DAYS, DEFAULT_TRAINING_DAYS};
use crate::state::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/train", post(train))
        .route("/predict", post(predict))
        .route("/detect-anomaly", post(detect_anomaly))
        .route("/monthly-forecast", post(monthly_forecast))
        .route("/insights/:user_id", get(insights))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MlRequest {
    user_id: Option<Value>,
    days: Option<u32>,
    predict_days: Option<u32>,
    current_power_w: Option<Value>,
}

fn require_user(req: &mut MlRequest) -> Result<String, AppError> {
    text(req.user_id.take()).ok_or_else(|| AppError::Validation("userId is required".to_string()))
}

async fn health(_admin: AdminSession, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    match state.forecaster.health().await {
        Ok(data) => Ok(Json(json!({ "success": true, "data": data }))),
        Err(e) => {
            tracing::warn!(error = %e, "forecasting service health check failed");
            Err(AppError::Unavailable("ML service unavailable".to_string()))
        }
    }
}

async fn train(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(mut req): Json<MlRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&mut req)?;
    let days = req.days.unwrap_or(DEFAULT_TRAINING_DAYS);
    tracing::info!(%user_id, days, "training forecast models");
    let data = state.forecaster.train(&user_id, days).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Models trained successfully",
        "data": data,
    })))
}

async fn predict(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(mut req): Json<MlRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&mut req)?;
    let days = req.predict_days.unwrap_or(DEFAULT_PREDICT_DAYS);
    let data = state.forecaster.predict_consumption(&user_id, days).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn detect_anomaly(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(mut req): Json<MlRequest>,
) -> Result<Json<Value>, AppError> {
    let (Some(user_id), Some(power)) = (text(req.user_id.take()), number(req.current_power_w.take()))
    else {
        return Err(AppError::Validation(
            "userId and currentPowerW are required".to_string(),
        ));
    };
    let data = state.forecaster.detect_anomaly(&user_id, power).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn monthly_forecast(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(mut req): Json<MlRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&mut req)?;
    let data = state.forecaster.monthly_forecast(&user_id).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn insights(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<InsightParams>,
) -> Json<Value> {
    let out = report::gather_insights(state.forecaster.as_ref(), &user_id, params.current_power_w).await;
    Json(json!({
        "success": true,
        "userId": out.user_id,
        "insights": out.insights,
        "errors": out.errors,
    }))
}
