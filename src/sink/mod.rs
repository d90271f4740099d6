//! Downstream record stores that accepted submissions are appended to.

pub mod file;
pub mod sheets;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SinkConfig;
use crate::models::Submission;

pub use file::FileSink;
pub use sheets::SheetsSink;
pub use webhook::WebhookSink;

/// Timeout applied by the HTTP client itself, independent of the worker's
/// per-attempt timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink rejected the record with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// An append-only record store.
///
/// Every error is treated as retryable by the worker; the sink does not
/// classify failures as permanent.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, submission: &Submission) -> Result<(), SinkError>;
}

/// Build the configured sink. Failure here is fatal for the pipeline.
pub async fn build(config: &SinkConfig) -> Result<Arc<dyn Sink>, SinkError> {
    let sink: Arc<dyn Sink> = match config {
        SinkConfig::Sheets {
            spreadsheet_id,
            sheet_name,
            access_token,
            api_base,
        } => Arc::new(SheetsSink::new(
            http_client()?,
            api_base,
            spreadsheet_id,
            sheet_name,
            access_token.clone(),
        )?),
        SinkConfig::Webhook { url, bearer } => {
            Arc::new(WebhookSink::new(http_client()?, url, bearer.clone())?)
        }
        SinkConfig::File { path } => Arc::new(FileSink::open(path).await?),
    };

    tracing::info!("Sink '{}' ready", sink.name());
    Ok(sink)
}

fn http_client() -> Result<reqwest::Client, SinkError> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Turn a non-2xx response into [`SinkError::Rejected`], keeping a prefix of the body.
async fn check_response(resp: reqwest::Response) -> Result<(), SinkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    let body = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(1024)
        .collect::<String>();

    Err(SinkError::Rejected {
        status: status.as_u16(),
        body,
    })
}
