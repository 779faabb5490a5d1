use axum::{
    extract::{Query, State},
    http::header::SET_COOKIE,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use meter_client::domain::{Reading, SeverityCounts, User};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{text, ReadingParams};
use crate::auth::{Role, UserSession};
use crate::error::AppError;
use crate::forecast::report::{self, PredictionReport};
use crate::forecast::Horizon;
use crate::state::AppState;
use crate::views::{self, DailySummary, UserDashboard};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/profile", get(profile))
        .route("/api/readings", get(readings))
        .route("/api/readings/latest", get(latest))
        .route("/api/daily-summary", get(daily_summary))
        .route("/api/alerts", get(alerts))
        .route("/predictions", get(predictions))
        .route("/api/predict/next-day", get(next_day))
        .route("/api/predict/next-week", get(next_week))
        .route("/api/predict/next-month", get(next_month))
        .route("/insights", get(insights))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginForm {
    consumer_number: Option<Value>,
    phone: Option<Value>,
}

async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(consumer_number), Some(phone)) = (text(form.consumer_number), text(form.phone))
    else {
        return Err(AppError::Validation(
            "Consumer number and phone are required".to_string(),
        ));
    };

    let user = match authenticate(&state, &consumer_number, &phone).await {
        Ok(user) => user,
        Err(e) => {
            metrics::counter!("portal_logins_total", "role" => "user", "outcome" => "rejected")
                .increment(1);
            return Err(e);
        }
    };

    let alerts = state.store.count_user_alerts(&user.id).await?;
    let token = state.sessions.issue(&user.id, Role::User, &user.name, alerts)?;
    metrics::counter!("portal_logins_total", "role" => "user", "outcome" => "ok").increment(1);
    tracing::info!(user_id = %user.id, "user logged in");

    Ok((
        [(SET_COOKIE, state.sessions.cookie(&token))],
        Json(json!({
            "success": true,
            "redirectUrl": "/user/dashboard",
            "message": "Login successful",
        })),
    ))
}

async fn authenticate(state: &AppState, consumer_number: &str, phone: &str) -> Result<User, AppError> {
    let user = state
        .store
        .find_user_by_consumer_number(consumer_number)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid consumer number".to_string()))?;

    if !user.phone_matches(phone) {
        return Err(AppError::Unauthorized("Invalid phone number".to_string()));
    }
    if !user.is_installed {
        return Err(AppError::Unauthorized(
            "Your service is not installed yet. Please contact support.".to_string(),
        ));
    }
    Ok(user)
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, state.sessions.clear_cookie())],
        Json(json!({ "success": true, "redirectUrl": "/" })),
    )
}

async fn dashboard(
    session: UserSession,
    State(state): State<AppState>,
) -> Result<Json<UserDashboard>, AppError> {
    let user_id = session.user_id();
    let today_query = views::day_query(views::today());
    let (daily, today) = tokio::try_join!(
        state.store.daily_aggregates(user_id),
        state.store.readings(user_id, &today_query),
    )?;
    Ok(Json(UserDashboard::build(&daily, today)))
}

async fn profile(session: UserSession, State(state): State<AppState>) -> Result<Json<User>, AppError> {
    state
        .store
        .get_user(session.user_id())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("User profile does not exist".to_string()))
}

async fn readings(
    session: UserSession,
    State(state): State<AppState>,
    Query(params): Query<ReadingParams>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let query = params.into_query()?;
    Ok(Json(state.store.readings(session.user_id(), &query).await?))
}

async fn latest(session: UserSession, State(state): State<AppState>) -> Result<Json<Reading>, AppError> {
    state
        .store
        .latest_reading(session.user_id())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No data found".to_string()))
}

async fn daily_summary(
    session: UserSession,
    State(state): State<AppState>,
) -> Result<Json<DailySummary>, AppError> {
    let user_id = session.user_id();
    let today_query = views::day_query(views::today());
    let (daily, today) = tokio::try_join!(
        state.store.daily_aggregates(user_id),
        state.store.readings(user_id, &today_query),
    )?;
    Ok(Json(DailySummary::build(&daily, today)))
}

async fn alerts(session: UserSession, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let alerts = state.store.user_alerts(session.user_id()).await?;
    let counts = SeverityCounts::tally(&alerts);
    Ok(Json(json!({ "alerts": alerts, "counts": counts })))
}

async fn predictions(
    session: UserSession,
    State(state): State<AppState>,
) -> Result<Json<PredictionReport>, AppError> {
    let history = state.store.daily_aggregates(session.user_id()).await?;
    Ok(Json(
        report::predict_all(state.forecaster.as_ref(), session.user_id(), &history).await,
    ))
}

async fn predict_one(
    session: &UserSession,
    state: &AppState,
    horizon: Horizon,
) -> Result<Json<Value>, AppError> {
    let history = state.store.daily_aggregates(session.user_id()).await?;
    let outcome = report::predict_horizon(state.forecaster.as_ref(), &history, horizon).await;
    Ok(Json(json!({
        "success": outcome.is_predicted(),
        "horizon": horizon,
        "availableDays": history.len(),
        "result": outcome,
    })))
}

async fn next_day(session: UserSession, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    predict_one(&session, &state, Horizon::Daily).await
}

async fn next_week(session: UserSession, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    predict_one(&session, &state, Horizon::Weekly).await
}

async fn next_month(session: UserSession, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    predict_one(&session, &state, Horizon::Monthly).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InsightParams {
    pub current_power_w: Option<f64>,
}

async fn insights(
    session: UserSession,
    State(state): State<AppState>,
    Query(params): Query<InsightParams>,
) -> Json<Value> {
    let out = report::gather_insights(
        state.forecaster.as_ref(),
        session.user_id(),
        params.current_power_w,
    )
    .await;
    Json(json!({ "success": true, "userId": out.user_id, "insights": out.insights, "errors": out.errors }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use meter_client::db::Store;
    use meter_client::domain::{NewAlert, Severity};
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};

    use super::super::testing::*;

    async fn login(h: &Harness, consumer: Value, phone: Value) -> (StatusCode, String, Value) {
        let (status, headers, body) = h
            .send(send_json(
                "POST",
                "/user/login",
                json!({ "consumerNumber": consumer, "phone": phone }),
                None,
            ))
            .await;
        (status, cookie_pair(&headers), body)
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let h = harness();
        let (status, _, body) = h
            .send(send_json("POST", "/user/login", json!({ "consumerNumber": "1155" }), None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Consumer number and phone are required");
    }

    #[tokio::test]
    async fn login_rejects_unknown_consumer_and_wrong_phone() {
        let h = harness();
        h.store.insert_user(household("u-1", "1155", true)).await;

        let (status, cookie, body) = login(&h, json!("9999"), json!("919847012345")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(cookie.is_empty());
        assert_eq!(body["message"], "Invalid consumer number");

        let (status, _, body) = login(&h, json!("1155"), json!("9847000000")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid phone number");
    }

    #[tokio::test]
    async fn login_rejects_uninstalled_service() {
        let h = harness();
        h.store.insert_user(household("u-1", "1155", false)).await;

        let (status, _, body) = login(&h, json!("1155"), json!("+91 98470 12345")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body["message"],
            "Your service is not installed yet. Please contact support."
        );
    }

    #[tokio::test]
    async fn login_sets_session_usable_on_dashboard() {
        let h = harness();
        h.store.insert_user(household("u-1", "1155", true)).await;
        h.store
            .push_alert(NewAlert {
                user_id: Some("u-1".into()),
                severity: Severity::High,
                message: "Load exceeded".into(),
            })
            .await
            .unwrap();

        // Numeric consumer number and differently formatted phone still match.
        let (status, cookie, body) = login(&h, json!(1155), json!("919847012345")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["redirectUrl"], "/user/dashboard");
        assert!(cookie.starts_with("portal-session="));
        let claims = h
            .state
            .sessions
            .verify(cookie.trim_start_matches("portal-session="))
            .unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.alerts, 1);

        let (status, _, body) = h.send(fetch("/user/dashboard", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dailyTrend"], json!([]));
        assert!(body["latestReading"].is_null());
    }

    #[tokio::test]
    async fn user_pages_require_a_user_session() {
        let h = harness();
        let (status, _, _) = h.send(fetch("/user/dashboard", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let admin = h.admin_cookie();
        let (status, _, _) = h.send(fetch("/user/profile", Some(&admin))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_and_latest_report_missing_records() {
        let h = harness();
        let cookie = h.user_cookie("ghost");
        let (status, _, body) = h.send(fetch("/user/profile", Some(&cookie))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User profile does not exist");

        let (status, _, _) = h.send(fetch("/user/api/readings/latest", Some(&cookie))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dashboard_keeps_last_seven_days_and_todays_readings() {
        let h = harness();
        h.store.insert_user(household("u-1", "1155", true)).await;
        let today = OffsetDateTime::now_utc().date();
        for back in 0..10 {
            h.store
                .record_daily_total("u-1", today - Duration::days(back), 10.0 + back as f64)
                .await
                .unwrap();
        }
        let now = OffsetDateTime::now_utc();
        let mut reading = meter_client::domain::Reading {
            id: "r-today".into(),
            user_id: "u-1".into(),
            timestamp: now,
            voltage: 231.0,
            current: 2.0,
            power: 462.0,
            daily_energy_kwh: 1.2,
            monthly_energy_kwh: 30.0,
        };
        h.store.append_reading(&reading).await.unwrap();
        reading.id = "r-old".into();
        reading.timestamp = now - Duration::days(2);
        h.store.append_reading(&reading).await.unwrap();

        let cookie = h.user_cookie("u-1");
        let (status, _, body) = h.send(fetch("/user/dashboard", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dailyTrend"].as_array().unwrap().len(), 7);
        assert_eq!(body["latestReading"]["total_units"], 10.0);
        let today_ids: Vec<_> = body["todayReadings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(today_ids, vec!["r-today"]);

        let (_, _, summary) = h.send(fetch("/user/api/daily-summary", Some(&cookie))).await;
        assert_eq!(summary["tenDays"].as_array().unwrap().len(), 10);
        assert_eq!(summary["month"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn alerts_come_with_severity_counts() {
        let h = harness();
        for (severity, msg) in [(Severity::High, "a"), (Severity::Low, "b"), (Severity::Low, "c")] {
            h.store
                .push_alert(NewAlert {
                    user_id: Some("u-1".into()),
                    severity,
                    message: msg.into(),
                })
                .await
                .unwrap();
        }
        let cookie = h.user_cookie("u-1");
        let (_, _, body) = h.send(fetch("/user/api/alerts", Some(&cookie))).await;
        assert_eq!(body["alerts"].as_array().unwrap().len(), 3);
        assert_eq!(body["counts"], json!({ "high": 1, "medium": 0, "low": 2 }));
    }

    #[tokio::test]
    async fn predictions_report_each_horizon() {
        let h = harness();
        let today = OffsetDateTime::now_utc().date();
        for back in 0..20 {
            h.store
                .record_daily_total("u-1", today - Duration::days(back), 8.0)
                .await
                .unwrap();
        }
        let cookie = h.user_cookie("u-1");

        let (status, _, body) = h.send(fetch("/user/predictions", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["availableDays"], 20);
        assert_eq!(body["predictions"]["daily"]["daysUsed"], 14);
        assert_eq!(body["predictions"]["weekly"]["daysUsed"], 14);
        assert_eq!(body["predictions"]["monthly"]["daysUsed"], 20);

        let (_, _, body) = h.send(fetch("/user/api/predict/next-week", Some(&cookie))).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["horizon"], "weekly");
        assert_eq!(body["result"]["inputCount"], 14);
    }

    #[tokio::test]
    async fn next_month_without_enough_history_is_explained() {
        let h = harness();
        let cookie = h.user_cookie("u-1");
        let (status, _, body) = h.send(fetch("/user/api/predict/next-month", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["result"]["error"],
            "Not enough data for monthly prediction (minimum 14 days required)"
        );
    }

    #[tokio::test]
    async fn insights_use_the_session_user() {
        let h = harness();
        let cookie = h.user_cookie("u-42");
        let (status, _, body) = h
            .send(fetch("/user/insights?currentPowerW=7000", Some(&cookie)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], "u-42");
        assert_eq!(body["insights"]["currentAnomaly"]["is_anomaly"], true);
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let h = harness();
        let (status, headers, _) = h.send(send_json("POST", "/user/logout", json!({}), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cookie_pair(&headers), "portal-session=");
    }
}
