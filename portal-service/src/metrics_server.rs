use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the Prometheus recorder and serves `/metrics` on `bind_addr`.
pub fn init(bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics bind address: {e}"))?;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))?;

    // Only the first call wins; later calls keep the original recorder.
    let _ = PROM_HANDLE.set(handle);
    describe();

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "metrics listener started");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

fn describe() {
    metrics::describe_counter!("portal_logins_total", "Login attempts by role and outcome");
    metrics::describe_counter!("portal_registrations_total", "User registrations by outcome");
    metrics::describe_counter!("forecast_requests_total", "Calls to the forecasting service by endpoint and outcome");
    metrics::describe_histogram!("forecast_request_seconds", "Forecasting service round-trip time");
    metrics::describe_counter!("ingest_readings_total", "Readings persisted by the ingest pipeline");
    metrics::describe_counter!("ingest_alerts_raised_total", "Alerts raised while ingesting readings");
    metrics::describe_counter!("ingest_sink_errors_total", "Batches dropped after exhausting retries");
    metrics::describe_histogram!("ingest_end_to_end_latency_seconds", "Time from receipt to persistence for a batch");
    metrics::describe_counter!("validation_reading_rejected_total", "Readings rejected by validation");
    metrics::describe_counter!("http_ingest_requests_total", "Accepted ingest requests");
    metrics::describe_counter!("http_ingest_unauthorized_total", "Ingest requests with a bad bearer token");
}

async fn metrics_handler() -> String {
    PROM_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
