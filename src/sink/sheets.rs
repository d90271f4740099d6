use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;

use super::{Sink, SinkError, check_response};
use crate::models::Submission;

/// Appends one row per submission to a Google Sheets tab through the
/// `values:append` REST call. The access token is obtained out of band.
pub struct SheetsSink {
    client: reqwest::Client,
    append_url: Url,
    access_token: String,
}

impl SheetsSink {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
        access_token: String,
    ) -> Result<Self, SinkError> {
        let append_url = append_url(api_base, spreadsheet_id, sheet_name)?;
        Ok(Self {
            client,
            append_url,
            access_token,
        })
    }
}

fn append_url(api_base: &str, spreadsheet_id: &str, sheet_name: &str) -> Result<Url, SinkError> {
    let range = format!("{sheet_name}:append");
    let mut url = Url::parse(api_base)
        .map_err(|e| SinkError::Config(format!("invalid Sheets API base '{api_base}': {e}")))?;

    url.path_segments_mut()
        .map_err(|_| SinkError::Config(format!("Sheets API base '{api_base}' cannot be a base")))?
        .pop_if_empty()
        .extend([
            "v4",
            "spreadsheets",
            spreadsheet_id,
            "values",
            range.as_str(),
        ]);

    url.query_pairs_mut()
        .append_pair("valueInputOption", "RAW")
        .append_pair("insertDataOption", "INSERT_ROWS");

    Ok(url)
}

#[async_trait]
impl Sink for SheetsSink {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn append(&self, submission: &Submission) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(self.append_url.clone())
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": [submission.row()] }))
            .send()
            .await?;

        check_response(resp).await
    }
}
