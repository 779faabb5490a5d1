use std::{sync::Arc, time::Duration};

use anyhow::Result;
use portal_service::{
    auth::{password::HASH_COST, SessionKeys},
    config::AppConfig,
    forecast::ForecastClient,
    metrics_server, observability,
    pipeline::Pipeline,
    server,
    sinks::StoreSink,
    sources::HttpReadingsSource,
    state::{self, AppState},
    transform::ReadingValidation,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = state::connect_store(&cfg.store).await?;
    if let Some(seed) = &cfg.admin {
        state::seed_admin(store.as_ref(), seed, HASH_COST).await?;
    }
    let forecaster = ForecastClient::new(
        cfg.forecast.base_url.clone(),
        Duration::from_millis(cfg.forecast.timeout_ms),
    )?;
    let sessions = SessionKeys::new(
        cfg.server.session_secret.as_bytes(),
        Duration::from_secs(cfg.server.session_ttl_secs),
        cfg.server.cookie_secure,
    );

    // Live ingest runs next to the portal when configured.
    if let Some(ingest) = &cfg.ingest {
        let source = HttpReadingsSource::bind(
            &ingest.source.http_bind_addr,
            ingest.source.channel_capacity,
            ingest.source.auth_bearer_token.clone(),
        )
        .await?;
        let sink = StoreSink::new(
            store.clone(),
            ingest.sink.batch_size,
            ingest.sink.max_retries,
            Duration::from_millis(ingest.sink.retry_backoff_ms),
        );
        let pipeline = Pipeline::new(source, sink).with_transform(ReadingValidation);
        tokio::spawn(async move {
            if let Err(e) = pipeline.run().await {
                tracing::error!(error = %e, "reading ingest pipeline stopped");
            }
        });
    }

    let state = AppState::new(store, Arc::new(forecaster), sessions);
    server::serve(&cfg.server.bind_addr, state).await
}
