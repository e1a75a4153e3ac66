//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers the collection lifecycle used by the
//! index pipeline (drop and recreate), plus the point operations needed by
//! search and update. Backends:
//!
//! - [`milvus::MilvusStore`]: Milvus / Zilliz Cloud over the REST v2 API.
//! - [`memory::MemoryStore`]: in-process, brute-force inner product.
//!
//! Implementations must be `Send + Sync` to be shared across axum handlers.

pub mod memory;
pub mod milvus;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::VectorStoreConfig;
use crate::models::{ChunkRecord, SearchHit};

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn has_collection(&self) -> Result<bool>;

    async fn drop_collection(&self) -> Result<()>;

    /// Create the collection with a vector field of `dims` dimensions.
    async fn create_collection(&self, dims: usize) -> Result<()>;

    async fn insert(&self, records: &[ChunkRecord]) -> Result<()>;

    /// Nearest neighbours by inner product, best first.
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    async fn get(&self, chunk_id: i64) -> Result<Option<ChunkRecord>>;

    async fn delete(&self, chunk_id: i64) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Build the store named by `config.provider`.
pub fn create_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "milvus" => Ok(Arc::new(milvus::MilvusStore::from_config(config)?)),
        "memory" => Ok(Arc::new(memory::MemoryStore::new())),
        other => bail!("Unknown vector store provider: {}", other),
    }
}
