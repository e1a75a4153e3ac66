//! Index pipeline: walk → chunk → embed → recreate collection → insert.
//!
//! A run always replaces the whole collection. Chunk ids restart at 0, so
//! keeping rows from an earlier run would collide on the primary key.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::archive;
use crate::chunk;
use crate::config::Config;
use crate::embedding::{embed_chunks, Embedder};
use crate::models::ChunkRecord;
use crate::store::VectorStore;
use crate::walker;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub root: PathBuf,
    pub files: usize,
    pub chunks: usize,
    pub files_by_extension: BTreeMap<String, usize>,
    pub chunks_by_language: BTreeMap<String, usize>,
    pub started_at: DateTime<Utc>,
    /// Zero when the run stopped before touching the store.
    pub elapsed_ms: i64,
}

/// `workspace.index_root`, else the first folder in `workspace.uploads_dir`.
pub fn resolve_index_root(config: &Config) -> Result<PathBuf> {
    if let Some(root) = &config.workspace.index_root {
        return Ok(root.clone());
    }
    match archive::existing_folder(&config.workspace.uploads_dir) {
        Some(folder) => Ok(folder),
        None => bail!(
            "No folder to index: set workspace.index_root (or FOLDER_TO_UPLOAD), or upload a zip into {}",
            config.workspace.uploads_dir.display()
        ),
    }
}

pub async fn run_index(
    config: &Config,
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<IndexReport> {
    let root = resolve_index_root(config)?;
    tracing::info!(root = %root.display(), "indexing folder");

    let files = walker::discover_files(
        &root,
        &config.workspace.include_globs,
        &config.workspace.exclude_globs,
    )?;
    let files_by_extension = walker::count_by_extension(&files);
    for (ext, n) in &files_by_extension {
        tracing::info!("  {} files: {}", ext, n);
    }

    let mut report = IndexReport {
        root,
        files: files.len(),
        files_by_extension,
        started_at: Utc::now(),
        ..Default::default()
    };
    if files.is_empty() {
        tracing::warn!("no supported files found; collection left untouched");
        return Ok(report);
    }

    let chunks = chunk::chunk_files(&files);
    report.chunks = chunks.len();
    report.chunks_by_language = chunk::count_by_language(&chunks);
    for (lang, n) in &report.chunks_by_language {
        tracing::info!("  {}: {} chunks", lang, n);
    }
    if chunks.is_empty() {
        tracing::warn!("no chunks extracted; collection left untouched");
        return Ok(report);
    }

    if embedder.dims() == 0 {
        bail!("Embeddings are disabled; set embedding.provider to index");
    }

    let vectors = embed_chunks(
        embedder,
        &chunks,
        config.embedding.batch_size,
        config.embedding.max_input_chars,
    )
    .await;

    let records: Vec<ChunkRecord> = chunks
        .iter()
        .zip(vectors)
        .map(|(c, v)| ChunkRecord::from_chunk(c, v))
        .collect();
    let dims = records.first().map(|r| r.vector.len()).unwrap_or(embedder.dims());

    if store.has_collection().await? {
        store
            .drop_collection()
            .await
            .context("Failed to drop existing collection")?;
    }
    store
        .create_collection(dims)
        .await
        .context("Failed to create collection")?;
    store
        .insert(&records)
        .await
        .context("Failed to insert records")?;

    report.elapsed_ms = (Utc::now() - report.started_at).num_milliseconds();
    tracing::info!(
        files = report.files,
        chunks = report.chunks,
        elapsed_ms = report.elapsed_ms,
        "index complete"
    );
    Ok(report)
}
