use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// One row returned by the API: an opaque field → value mapping.
/// The shape is not validated here; whatever the API returns is persisted.
pub type Record = serde_json::Map<String, Value>;

/// Source of daily records, one fetch per calendar date.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_date(&self, date: NaiveDate) -> Result<Vec<Record>>;
}

/// `DataSource` backed by a single HTTP endpoint, queried as
/// `GET {api_url}?date=YYYY-MM-DD`.
pub struct HttpSource {
    client: Client,
    api_url: String,
}

impl HttpSource {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl DataSource for HttpSource {
    /// Fetch all records for one date.
    ///
    /// Transport failures and non-success statuses are downgraded to an empty
    /// result: no partition gets written, so the date is retried on the next
    /// run. A success response with a malformed body is an error and aborts
    /// the run.
    async fn fetch_date(&self, date: NaiveDate) -> Result<Vec<Record>> {
        let date_str = date.format("%Y-%m-%d").to_string();

        let resp = match self
            .client
            .get(&self.api_url)
            .query(&[("date", date_str.as_str())])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(date = %date_str, error = %e, "Request failed, treating as no data");
                return Ok(Vec::new());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(date = %date_str, %status, "Non-success response, treating as no data");
            return Ok(Vec::new());
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read response body for {date_str}"))?;
        decode_records(&body).with_context(|| format!("Malformed API payload for {date_str}"))
    }
}

/// Parse a response body as a JSON array of objects.
fn decode_records(body: &str) -> Result<Vec<Record>> {
    let value: Value = serde_json::from_str(body).context("Response is not valid JSON")?;
    let Value::Array(items) = value else {
        bail!("Expected a JSON array body");
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => bail!("Expected a JSON object per record, got: {other}"),
        })
        .collect()
}
