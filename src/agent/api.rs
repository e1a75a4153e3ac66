//! Client for the service's own HTTP API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::{CodeResult, UpdateOutcome};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const REINDEX_TIMEOUT: Duration = Duration::from_secs(600);

/// The two operations the chat agent can perform.
#[async_trait]
pub trait CodeTools: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<CodeResult>>;
    async fn update(&self, chunk_id: i64, new_code: &str) -> Result<UpdateOutcome>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<Value> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Cannot connect to {}", self.base_url))?;
        read_json(resp).await
    }

    /// Run the index pipeline on the server. Slow for large trees.
    pub async fn reindex(&self) -> Result<Value> {
        let resp = self
            .client
            .post(self.url("/api/upload-all"))
            .timeout(REINDEX_TIMEOUT)
            .send()
            .await
            .context("Upload pipeline request failed")?;
        read_json(resp).await
    }

    /// Send a zip archive to `/api/upload`.
    pub async fn upload(&self, zip: Vec<u8>, replace: bool, reindex: bool) -> Result<Value> {
        let resp = self
            .client
            .post(self.url("/api/upload"))
            .query(&[("replace", replace), ("reindex", reindex)])
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(zip)
            .timeout(REINDEX_TIMEOUT)
            .send()
            .await
            .context("Upload request failed")?;
        read_json(resp).await
    }
}

#[async_trait]
impl CodeTools for ApiClient {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<CodeResult>> {
        let resp = self
            .client
            .post(self.url("/api/search"))
            .timeout(TOOL_TIMEOUT)
            .json(&json!({ "query": query, "top_k": top_k }))
            .send()
            .await
            .context("Search request failed")?;
        let body = read_json(resp).await?;
        let results = body.get("results").cloned().unwrap_or(Value::Array(vec![]));
        Ok(serde_json::from_value(results)?)
    }

    async fn update(&self, chunk_id: i64, new_code: &str) -> Result<UpdateOutcome> {
        let resp = self
            .client
            .post(self.url("/api/update"))
            .timeout(TOOL_TIMEOUT)
            .json(&json!({ "chunk_id": chunk_id, "new_code": new_code }))
            .send()
            .await
            .context("Update request failed")?;
        Ok(serde_json::from_value(read_json(resp).await?)?)
    }
}

/// Body of a 2xx response, or an error carrying the server's message.
async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("HTTP {}: {}", status.as_u16(), error_message(&text));
    }
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON response: {}", text))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
