//! Milvus / Zilliz Cloud backend over the REST v2 API.
//!
//! Every endpoint is a `POST` with a JSON body naming the collection, and
//! every response is wrapped in `{ "code": 0, "data": ... }`. A non-zero
//! `code` is turned into an error carrying the server's `message`.
//!
//! Collection schema:
//!
//! | Field | Type |
//! |-------|------|
//! | `my_id` | INT64, primary key, no auto id |
//! | `my_vector` | FLOAT_VECTOR(dims), `AUTOINDEX`, `IP` metric |
//! | `file_path` | VARCHAR(512) |
//! | `file_name` | VARCHAR(256) |
//! | `language` | VARCHAR(50) |
//! | `chunk_index` | INT64 |
//! | `code_snippet` | VARCHAR(65535) |

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;

use super::VectorStore;
use crate::config::VectorStoreConfig;
use crate::models::{
    ChunkRecord, SearchHit, MAX_FILE_NAME_LEN, MAX_FILE_PATH_LEN, MAX_LANGUAGE_LEN,
    MAX_SNIPPET_LEN,
};

const ID_FIELD: &str = "my_id";
const VECTOR_FIELD: &str = "my_vector";
const INSERT_BATCH: usize = 100;
const OUTPUT_FIELDS: &[&str] = &[
    "my_id",
    "file_path",
    "file_name",
    "language",
    "chunk_index",
    "code_snippet",
];

pub struct MilvusStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
    collection: String,
}

impl MilvusStore {
    pub fn new(
        endpoint: &str,
        token: Option<SecretString>,
        collection: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            collection: collection.to_string(),
        })
    }

    /// Endpoint from config; token from `TOKEN` when set.
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            anyhow!("vector_store.endpoint is not set (or set CLUSTER_ENDPOINT)")
        })?;
        let token = std::env::var("TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);
        Self::new(
            endpoint,
            token,
            &config.collection,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/v2/vectordb/{}", self.endpoint, path);
        let mut req = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Milvus request to {} failed", path))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Milvus {} returned HTTP {}: {}", path, status, text);
        }
        let envelope: Value = resp
            .json()
            .await
            .with_context(|| format!("Milvus {} returned invalid JSON", path))?;
        unwrap_envelope(path, envelope)
    }
}

/// Return `data` from a `{code, data, message}` envelope, or an error for a
/// non-zero code.
pub fn unwrap_envelope(path: &str, envelope: Value) -> Result<Value> {
    let code = envelope.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    if code != 0 {
        let message = envelope
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        bail!("Milvus {} failed (code {}): {}", path, code, message);
    }
    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
}

pub fn create_collection_body(collection: &str, dims: usize) -> Value {
    let varchar = |name: &str, max: usize| {
        json!({
            "fieldName": name,
            "dataType": "VarChar",
            "elementTypeParams": { "max_length": max }
        })
    };
    json!({
        "collectionName": collection,
        "schema": {
            "autoId": false,
            "enableDynamicField": true,
            "fields": [
                { "fieldName": ID_FIELD, "dataType": "Int64", "isPrimary": true },
                {
                    "fieldName": VECTOR_FIELD,
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": dims }
                },
                varchar("file_path", MAX_FILE_PATH_LEN),
                varchar("file_name", MAX_FILE_NAME_LEN),
                varchar("language", MAX_LANGUAGE_LEN),
                { "fieldName": "chunk_index", "dataType": "Int64" },
                varchar("code_snippet", MAX_SNIPPET_LEN),
            ]
        },
        "indexParams": [{
            "fieldName": VECTOR_FIELD,
            "indexName": VECTOR_FIELD,
            "indexType": "AUTOINDEX",
            "metricType": "IP"
        }]
    })
}

fn record_to_row(r: &ChunkRecord) -> Value {
    json!({
        ID_FIELD: r.chunk_id,
        VECTOR_FIELD: r.vector,
        "file_path": r.file_path,
        "file_name": r.file_name,
        "language": r.language,
        "chunk_index": r.chunk_index,
        "code_snippet": r.code_snippet,
    })
}

/// Parse a returned entity. Search hits carry the primary key as `id` or
/// `my_id`, and no vector unless it was requested.
pub fn record_from_row(row: &Value) -> Result<ChunkRecord> {
    let str_field = |name: &str| {
        row.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let chunk_id = row
        .get(ID_FIELD)
        .or_else(|| row.get("id"))
        .and_then(as_i64)
        .ok_or_else(|| anyhow!("Milvus row has no primary key"))?;
    let vector = row
        .get(VECTOR_FIELD)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().map(|x| x.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default();

    Ok(ChunkRecord {
        chunk_id,
        vector,
        file_path: str_field("file_path"),
        file_name: str_field("file_name"),
        language: str_field("language"),
        chunk_index: row.get("chunk_index").and_then(as_i64).unwrap_or(0),
        code_snippet: str_field("code_snippet"),
    })
}

// INT64 values may come back as strings
fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[async_trait]
impl VectorStore for MilvusStore {
    async fn has_collection(&self) -> Result<bool> {
        let data = self
            .call(
                "collections/has",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        Ok(data.get("has").and_then(|h| h.as_bool()).unwrap_or(false))
    }

    async fn drop_collection(&self) -> Result<()> {
        self.call(
            "collections/drop",
            json!({ "collectionName": self.collection }),
        )
        .await?;
        tracing::info!(collection = %self.collection, "dropped collection");
        Ok(())
    }

    async fn create_collection(&self, dims: usize) -> Result<()> {
        self.call(
            "collections/create",
            create_collection_body(&self.collection, dims),
        )
        .await?;
        tracing::info!(collection = %self.collection, dims, "created collection");
        Ok(())
    }

    async fn insert(&self, records: &[ChunkRecord]) -> Result<()> {
        for batch in records.chunks(INSERT_BATCH) {
            let rows: Vec<Value> = batch.iter().map(record_to_row).collect();
            self.call(
                "entities/insert",
                json!({ "collectionName": self.collection, "data": rows }),
            )
            .await?;
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let data = self
            .call(
                "entities/search",
                json!({
                    "collectionName": self.collection,
                    "data": [vector],
                    "annsField": VECTOR_FIELD,
                    "limit": top_k,
                    "outputFields": OUTPUT_FIELDS,
                }),
            )
            .await?;

        let rows = data.as_array().cloned().unwrap_or_default();
        rows.iter()
            .map(|row| {
                let score = row.get("distance").and_then(|d| d.as_f64()).unwrap_or(0.0) as f32;
                Ok(SearchHit {
                    record: record_from_row(row)?,
                    score,
                })
            })
            .collect()
    }

    async fn get(&self, chunk_id: i64) -> Result<Option<ChunkRecord>> {
        let mut fields: Vec<&str> = OUTPUT_FIELDS.to_vec();
        fields.push(VECTOR_FIELD);
        let data = self
            .call(
                "entities/query",
                json!({
                    "collectionName": self.collection,
                    "filter": format!("{} == {}", ID_FIELD, chunk_id),
                    "outputFields": fields,
                    "limit": 1,
                }),
            )
            .await?;

        match data.as_array().and_then(|rows| rows.first()) {
            Some(row) => Ok(Some(record_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, chunk_id: i64) -> Result<()> {
        self.call(
            "entities/delete",
            json!({
                "collectionName": self.collection,
                "filter": format!("{} in [{}]", ID_FIELD, chunk_id),
            }),
        )
        .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let data = self
            .call(
                "collections/get_stats",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        Ok(data
            .get("rowCount")
            .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0))
    }
}
