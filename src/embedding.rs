//! Embedding provider abstraction and the OpenAI implementation.
//!
//! - **[`OpenAiEmbedder`]** calls the OpenAI embeddings API with batching,
//!   retry and backoff.
//! - **[`DisabledEmbedder`]** returns errors; used when
//!   `embedding.provider = "disabled"`.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! # Indexing fallback
//!
//! [`embed_chunks`] never fails as a whole: a failed batch is retried one
//! text at a time, and a text that still fails is stored with a zero
//! vector so the rest of the tree remains searchable.

use anyhow::{bail, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::config::{secret_from_env, EmbeddingConfig};
use crate::models::CodeChunk;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Something that turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-large"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality, `0` when disabled.
    fn dims(&self) -> usize;

    /// Embed a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Build the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(
            config,
            secret_from_env("OPENAI_API_KEY")?,
        )?)),
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    dims: usize,
    base_url: String,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // Only the v3 models accept a reduced dimension
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dims);
        }
        body
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = self.request_body(texts);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = parse_openai_response(&json)?;
                        if vectors.len() != texts.len() {
                            bail!(
                                "OpenAI returned {} embeddings for {} inputs",
                                vectors.len(),
                                texts.len()
                            );
                        }
                        return Ok(vectors);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Embed every chunk's snippet, in order.
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[CodeChunk],
    batch_size: usize,
    max_chars: usize,
) -> Vec<Vec<f32>> {
    let total = chunks.len();
    let mut vectors = Vec::with_capacity(total);
    tracing::info!(total, model = embedder.model_name(), "generating embeddings");

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch
            .iter()
            .map(|c| truncate_text(&c.code_snippet, max_chars))
            .collect();

        match embedder.embed(&texts).await {
            Ok(mut batch_vectors) => vectors.append(&mut batch_vectors),
            Err(e) => {
                tracing::warn!(error = %e, "batch embedding failed; falling back to single texts");
                for (chunk, text) in batch.iter().zip(texts.iter()) {
                    match embedder.embed_query(text).await {
                        Ok(v) => vectors.push(v),
                        Err(e) => {
                            tracing::warn!(
                                chunk_id = chunk.chunk_id,
                                file = %chunk.file_name,
                                error = %e,
                                "embedding failed; storing zero vector"
                            );
                            vectors.push(vec![0.0; embedder.dims()]);
                        }
                    }
                }
            }
        }

        let done = vectors.len();
        if done % 50 < batch.len() || done == total {
            tracing::info!("Processed {}/{} chunks", done, total);
        }
    }

    vectors
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: one dimension per vocabulary word counting
    /// its occurrences, plus a constant bias dimension.
    pub(crate) struct KeywordEmbedder {
        vocab: Vec<String>,
    }

    impl KeywordEmbedder {
        pub(crate) fn new(vocab: &[&str]) -> Self {
            Self {
                vocab: vocab.iter().map(|w| w.to_string()).collect(),
            }
        }

        fn vector(&self, text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            let mut v: Vec<f32> = self
                .vocab
                .iter()
                .map(|w| lower.matches(w.as_str()).count() as f32)
                .collect();
            v.push(0.01);
            v
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            self.vocab.len() + 1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        }
    }

    fn chunk(id: i64, text: &str) -> CodeChunk {
        CodeChunk {
            chunk_id: id,
            chunk_index: 0,
            file_path: "f.js".into(),
            file_name: "f.js".into(),
            language: "javascript".into(),
            code_snippet: text.into(),
            extra_context: String::new(),
        }
    }

    /// Fails whole batches and any text containing "bad".
    struct Flaky {
        batch_calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.len() > 1 {
                self.batch_calls.fetch_add(1, Ordering::SeqCst);
                bail!("batch rejected");
            }
            if texts[0].contains("bad") {
                bail!("text rejected");
            }
            Ok(vec![vec![texts[0].len() as f32, 1.0]])
        }
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc\n... [truncated]");
        // multi-byte chars count as one
        assert_eq!(truncate_text("ééé", 2), "éé\n... [truncated]");
    }

    #[test]
    fn parse_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] }
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn parse_rejects_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn request_body_sets_dimensions_for_v3() {
        let cfg = EmbeddingConfig::default();
        let e = OpenAiEmbedder::new(&cfg, SecretString::from("k".to_string())).unwrap();
        let body = e.request_body(&["a".to_string()]);
        assert_eq!(body["dimensions"], 3072);
        assert_eq!(body["model"], "text-embedding-3-large");
    }

    #[tokio::test]
    async fn failed_batches_fall_back_per_text_then_zero() {
        let embedder = Flaky {
            batch_calls: AtomicUsize::new(0),
        };
        let chunks = vec![chunk(0, "good"), chunk(1, "bad one"), chunk(2, "fine")];
        let vectors = embed_chunks(&embedder, &chunks, 3, 100).await;
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![4.0, 1.0]);
        assert_eq!(vectors[1], vec![0.0, 0.0]);
        assert_eq!(vectors[2], vec![4.0, 1.0]);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_embedder_errors() {
        assert!(DisabledEmbedder.embed_query("x").await.is_err());
    }
}
