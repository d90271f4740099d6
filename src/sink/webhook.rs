use async_trait::async_trait;
use reqwest::Url;

use super::{Sink, SinkError, check_response};
use crate::models::Submission;

/// POSTs each submission as JSON to a fixed URL. Any 2xx response counts as
/// an append.
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
    bearer: Option<String>,
}

impl WebhookSink {
    pub fn new(
        client: reqwest::Client,
        url: &str,
        bearer: Option<String>,
    ) -> Result<Self, SinkError> {
        let url = Url::parse(url)
            .map_err(|e| SinkError::Config(format!("invalid webhook URL '{url}': {e}")))?;
        Ok(Self {
            client,
            url,
            bearer,
        })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn append(&self, submission: &Submission) -> Result<(), SinkError> {
        let mut req = self
            .client
            .post(self.url.clone())
            .header("Idempotency-Key", submission.id().to_string());

        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.json(submission).send().await?;
        check_response(resp).await
    }
}
