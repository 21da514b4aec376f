//! HTTP client for the daemon's analysis API.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin reqwest wrapper over the daemon endpoints.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    analysis_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    batch_id: String,
}

#[derive(Deserialize)]
struct CancelResponse {
    cancelled: bool,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// Submit a repository for analysis. Returns the analysis id; subscribe
    /// only after this id is known.
    pub async fn submit_analysis(&self, path: &Path) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/api/analyses", self.base_url))
            .json(&json!({ "path": path }))
            .send()
            .await
            .context("daemon unreachable")?;

        if !response.status().is_success() {
            bail!("analysis submission rejected: {}", error_detail(response).await);
        }
        let body: SubmitResponse = response
            .json()
            .await
            .context("malformed submission response")?;
        Ok(body.analysis_id)
    }

    /// Submit a batch. Returns the batch id used for event registration.
    pub async fn submit_batch(&self, paths: &[&Path]) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/api/batch", self.base_url))
            .json(&json!({ "paths": paths }))
            .send()
            .await
            .context("daemon unreachable")?;

        if !response.status().is_success() {
            bail!("batch submission rejected: {}", error_detail(response).await);
        }
        let body: BatchResponse = response.json().await.context("malformed batch response")?;
        Ok(body.batch_id)
    }

    /// Request cancellation. `Ok(false)` means the daemon no longer knows the
    /// id.
    pub async fn cancel_analysis(&self, analysis_id: &str) -> Result<bool> {
        let response = self
            .http
            .post(format!(
                "{}/api/analyses/{}/cancel",
                self.base_url, analysis_id
            ))
            .json(&json!({}))
            .send()
            .await
            .context("daemon unreachable")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            bail!("cancel rejected: {}", error_detail(response).await);
        }
        let body: CancelResponse = response.json().await.context("malformed cancel response")?;
        Ok(body.cancelled)
    }
}

/// Pull the human-readable message out of an error envelope, falling back to
/// the raw body.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => value["error"]["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", status, body)),
        Err(_) => format!("{} {}", status, body),
    }
}
