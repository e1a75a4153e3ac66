//! In-memory [`VectorStore`] for tests and offline runs.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. Search is
//! brute-force inner product over every stored vector.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::VectorStore;
use crate::models::{ChunkRecord, SearchHit};

#[derive(Default)]
struct Collection {
    dims: usize,
    records: BTreeMap<i64, ChunkRecord>,
}

pub struct MemoryStore {
    collection: RwLock<Option<Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collection: RwLock::new(None),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Option<Collection>>> {
        self.collection
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Option<Collection>>> {
        self.collection
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn has_collection(&self) -> Result<bool> {
        Ok(self.read()?.is_some())
    }

    async fn drop_collection(&self) -> Result<()> {
        *self.write()? = None;
        Ok(())
    }

    async fn create_collection(&self, dims: usize) -> Result<()> {
        let mut guard = self.write()?;
        if guard.is_some() {
            bail!("collection already exists");
        }
        *guard = Some(Collection {
            dims,
            records: BTreeMap::new(),
        });
        Ok(())
    }

    async fn insert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut guard = self.write()?;
        let collection = guard
            .as_mut()
            .ok_or_else(|| anyhow!("collection does not exist"))?;
        for r in records {
            if r.vector.len() != collection.dims {
                bail!(
                    "vector for chunk {} has {} dims, collection expects {}",
                    r.chunk_id,
                    r.vector.len(),
                    collection.dims
                );
            }
        }
        for r in records {
            collection.records.insert(r.chunk_id, r.clone());
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let guard = self.read()?;
        let Some(collection) = guard.as_ref() else {
            bail!("collection does not exist");
        };

        let mut hits: Vec<SearchHit> = collection
            .records
            .values()
            .map(|r| SearchHit {
                score: inner_product(vector, &r.vector),
                record: r.clone(),
            })
            .collect();
        // Ties keep id order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, chunk_id: i64) -> Result<Option<ChunkRecord>> {
        Ok(self
            .read()?
            .as_ref()
            .and_then(|c| c.records.get(&chunk_id).cloned()))
    }

    async fn delete(&self, chunk_id: i64) -> Result<()> {
        if let Some(c) = self.write()?.as_mut() {
            c.records.remove(&chunk_id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self
            .read()?
            .as_ref()
            .map(|c| c.records.len() as u64)
            .unwrap_or(0))
    }
}
