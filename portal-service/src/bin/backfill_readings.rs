use std::{env, path::Path, time::Duration};

use anyhow::{bail, Result};
use meter_client::db::Store;
use meter_client::domain::Reading;
use portal_service::{
    config::{AppConfig, SinkConfig},
    observability,
    pipeline::{Pipeline, Source},
    sinks::StoreSink,
    sources::{ReadingsCsvFileSource, ReadingsNdjsonFileSource},
    state,
    transform::ReadingValidation,
};
use std::sync::Arc;

const DEFAULT_SINK: SinkConfig = SinkConfig {
    batch_size: 500,
    max_retries: 3,
    retry_backoff_ms: 250,
};

async fn run<S>(source: S, store: Arc<dyn Store>, sink_cfg: &SinkConfig) -> Result<()>
where
    S: Source<Reading> + 'static,
{
    let sink = StoreSink::new(
        store,
        sink_cfg.batch_size,
        sink_cfg.max_retries,
        Duration::from_millis(sink_cfg.retry_backoff_ms),
    );
    Pipeline::new(source, sink)
        .with_transform(ReadingValidation)
        .run()
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_readings <readings.csv|readings.ndjson>");
    }
    let file_path = Path::new(&args[1]);

    // PORTAL_CONFIG can point at a backfill-specific file.
    let cfg = AppConfig::load()?;
    let store = state::connect_store(&cfg.store).await?;
    let sink_cfg = cfg.ingest.as_ref().map_or(&DEFAULT_SINK, |i| &i.sink);

    tracing::info!(path = %file_path.display(), "backfilling readings");
    let is_csv = file_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        run(ReadingsCsvFileSource::new(file_path), store, sink_cfg).await?;
    } else {
        run(ReadingsNdjsonFileSource::new(file_path), store, sink_cfg).await?;
    }

    tracing::info!("backfill complete");
    Ok(())
}
