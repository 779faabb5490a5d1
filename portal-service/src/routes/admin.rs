use axum::{
    extract::{Path, Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use meter_client::domain::{AdminAccount, NewUser, Reading, SeverityCounts, User};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{number, text, ReadingParams};
use crate::auth::{password, AdminSession, Role};
use crate::error::AppError;
use crate::forecast::report::{self, PredictionReport};
use crate::state::AppState;
use crate::views::{self, AdminDashboard, DailySummary};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/users", get(users))
        .route("/users/overview", get(users_overview))
        .route("/registration", post(register))
        .route("/users/:id/mark-installed", put(mark_installed))
        .route("/user/:id/latest", get(user_latest))
        .route("/user/:id/readings", get(user_readings))
        .route("/user/:id/predictions", get(user_predictions))
        .route("/daily-summary/:id", get(daily_summary))
        .route("/alerts", get(alerts))
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let email = form.email.as_deref().map(AdminAccount::normalize_email);
    let (Some(email), Some(password)) = (email.filter(|e| !e.is_empty()), form.password) else {
        return Err(AppError::Validation("Email and password are required".to_string()));
    };

    let account = state.store.find_admin(&email).await?;
    let verified = match account {
        Some(account) => password::verify_password(password, account.password_hash).await?,
        None => false,
    };
    if !verified {
        metrics::counter!("portal_logins_total", "role" => "admin", "outcome" => "rejected")
            .increment(1);
        return Err(AppError::Unauthorized("Invalid email or password".to_string()));
    }

    let token = state.sessions.issue(&email, Role::Admin, &email, 0)?;
    metrics::counter!("portal_logins_total", "role" => "admin", "outcome" => "ok").increment(1);
    tracing::info!(%email, "admin logged in");

    Ok((
        [(SET_COOKIE, state.sessions.cookie(&token))],
        Json(json!({
            "success": true,
            "redirectUrl": "/admin/dashboard",
            "message": "Login successful",
        })),
    ))
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, state.sessions.clear_cookie())],
        Json(json!({ "success": true, "redirectUrl": "/admin/login" })),
    )
}

async fn dashboard(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<AdminDashboard>, AppError> {
    let (users, alerts, health) = tokio::join!(
        state.store.list_users(),
        state.store.admin_alerts(),
        state.forecaster.health(),
    );
    let users = users?;
    Ok(Json(AdminDashboard {
        total_users: users.len(),
        total_alerts: alerts?.len(),
        ml_service_online: health.is_ok(),
        users,
    }))
}

async fn users(_admin: AdminSession, State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.store.list_users().await?))
}

#[derive(Debug, Serialize)]
struct UserForecast {
    user: User,
    forecast: Option<Value>,
    error: Option<String>,
}

/// Every user with their monthly forecast, fetched concurrently.
async fn users_overview(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserForecast>>, AppError> {
    let users = state.store.list_users().await?;
    let forecaster = state.forecaster.as_ref();
    let rows = futures::future::join_all(users.into_iter().map(|user| async move {
        match forecaster.monthly_forecast(&user.id).await {
            Ok(v) => UserForecast {
                user,
                forecast: Some(v),
                error: None,
            },
            Err(e) => UserForecast {
                user,
                forecast: None,
                error: Some(e.to_string()),
            },
        }
    }))
    .await;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationForm {
    #[serde(default)]
    name: Option<String>,
    consumer_number: Option<Value>,
    phone_number: Option<Value>,
    email: Option<String>,
    address: Option<String>,
    approved_load: Option<Value>,
    phase_type: Option<String>,
}

async fn register(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(form): Json<RegistrationForm>,
) -> Result<impl IntoResponse, AppError> {
    let consumer_number = text(form.consumer_number)
        .ok_or_else(|| AppError::Validation("Consumer number is required".to_string()))?;

    let new_user = NewUser {
        name: form.name.unwrap_or_default().trim().to_string(),
        consumer_number,
        phone_number: text(form.phone_number).unwrap_or_default(),
        email: form.email.filter(|e| !e.trim().is_empty()),
        address: form.address.filter(|a| !a.trim().is_empty()),
        approved_load_kw: number(form.approved_load),
        approved_phase: form.phase_type.filter(|p| !p.trim().is_empty()),
    };

    let user = match state.store.create_user(new_user).await {
        Ok(user) => user,
        Err(e) => {
            metrics::counter!("portal_registrations_total", "outcome" => "rejected").increment(1);
            return Err(e.into());
        }
    };
    metrics::counter!("portal_registrations_total", "outcome" => "ok").increment(1);
    tracing::info!(user_id = %user.id, consumer_number = %user.consumer_number, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Registration successful",
            "user": user,
        })),
    ))
}

async fn mark_installed(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let user = state
        .store
        .set_installed(&id, true)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tracing::info!(user_id = %user.id, "service marked installed");
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn user_latest(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reading>, AppError> {
    state
        .store
        .latest_reading(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No readings found".to_string()))
}

async fn user_readings(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ReadingParams>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let query = params.into_query()?;
    Ok(Json(state.store.readings(&id, &query).await?))
}

async fn user_predictions(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PredictionReport>, AppError> {
    if state.store.get_user(&id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    let history = state.store.daily_aggregates(&id).await?;
    Ok(Json(
        report::predict_all(state.forecaster.as_ref(), &id, &history).await,
    ))
}

async fn daily_summary(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DailySummary>, AppError> {
    let today_query = views::day_query(views::today());
    let (daily, today) = tokio::try_join!(
        state.store.daily_aggregates(&id),
        state.store.readings(&id, &today_query),
    )?;
    Ok(Json(DailySummary::build(&daily, today)))
}

async fn alerts(_admin: AdminSession, State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let alerts = state.store.admin_alerts().await?;
    let counts = SeverityCounts::tally(&alerts);
    Ok(Json(json!({ "alerts": alerts, "counts": counts })))
}
