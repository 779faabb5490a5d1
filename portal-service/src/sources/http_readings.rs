use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use meter_client::domain::Reading;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use super::IncomingReading;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

#[derive(Clone)]
struct IngestState {
    tx: mpsc::Sender<Envelope<Reading>>,
    bearer_token: Option<Arc<str>>,
}

/// Live readings posted to `POST /ingest/readings` as one object or an array.
#[derive(Clone)]
pub struct HttpReadingsSource {
    receiver: Arc<Mutex<Option<mpsc::Receiver<Envelope<Reading>>>>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Batch {
    Many(Vec<IncomingReading>),
    One(IncomingReading),
}

impl HttpReadingsSource {
    /// Binds the listener and starts serving in the background.
    pub async fn bind(
        bind_addr: &str,
        channel_capacity: usize,
        bearer_token: Option<String>,
    ) -> Result<Self, PipelineError> {
        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| PipelineError::Source(format!("invalid bind addr: {e}")))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PipelineError::Source(format!("failed to bind ingest listener: {e}")))?;

        let (source, app) = Self::with_router(channel_capacity, bearer_token);
        tracing::info!(%addr, "reading ingest listener started");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                tracing::error!(error = %e, "reading ingest server error");
            }
        });
        Ok(source)
    }

    fn with_router(channel_capacity: usize, bearer_token: Option<String>) -> (Self, Router) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let state = IngestState {
            tx,
            bearer_token: bearer_token.map(Arc::from),
        };
        let app = Router::new()
            .route("/ingest/readings", post(ingest_readings))
            .with_state(state);
        let source = Self {
            receiver: Arc::new(Mutex::new(Some(rx))),
        };
        (source, app)
    }
}

#[async_trait::async_trait]
impl Source<Reading> for HttpReadingsSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        match self.receiver.lock().await.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "reading stream already taken; only one consumer supported".to_string(),
                ))
            })),
        }
    }
}

fn authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}

async fn ingest_readings(
    State(state): State<IngestState>,
    headers: HeaderMap,
    Json(batch): Json<Batch>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    if !authorized(&headers, state.bearer_token.as_deref()) {
        metrics::counter!("http_ingest_unauthorized_total").increment(1);
        return Err(StatusCode::UNAUTHORIZED);
    }
    metrics::counter!("http_ingest_requests_total").increment(1);

    let batch = match batch {
        Batch::Many(v) => v,
        Batch::One(r) => vec![r],
    };
    let accepted = batch.len();
    for incoming in batch {
        let reading: Reading = incoming.into();
        if state.tx.send(Envelope::now(reading)).await.is_err() {
            metrics::counter!("http_ingest_failed_total").increment(1);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))))
}
