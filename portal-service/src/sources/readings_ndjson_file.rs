use std::path::PathBuf;

use async_stream::try_stream;
use meter_client::domain::Reading;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use super::IncomingReading;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// NDJSON backfill: one reading object per line, blank lines skipped.
pub struct ReadingsNdjsonFileSource {
    path: PathBuf,
}

impl ReadingsNdjsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingsNdjsonFileSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        let path = self.path.clone();
        let s = try_stream! {
            let file = File::open(&path).await.map_err(|e| {
                PipelineError::Source(format!("failed to open backfill file: {e}"))
            })?;
            let mut lines = BufReader::new(file).lines();
            let mut line_no = 0usize;

            while let Some(line) = lines.next_line().await.map_err(|e| {
                PipelineError::Source(format!("failed to read backfill line: {e}"))
            })? {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: IncomingReading = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        metrics::counter!("backfill_reading_parse_errors_total").increment(1);
                        Err(PipelineError::Source(format!(
                            "line {line_no}: failed to parse reading: {e}"
                        )))?
                    }
                };
                yield Envelope::now(Reading::from(parsed));
            }
        };

        Box::pin(s)
    }
}
