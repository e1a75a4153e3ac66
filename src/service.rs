//! Search and update operations shared by the HTTP API, the MCP bridge and
//! the CLI.
//!
//! An update touches two places: the chunk's source file under the update
//! root (`workspace.update_root`, else the indexed folder), and the chunk's row in the vector store. The
//! two steps are independent and each is reported in [`UpdateOutcome`];
//! a failure in one does not roll back the other.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{truncate_text, Embedder};
use crate::index;
use crate::models::{ChunkRecord, CodeResult, UpdateOutcome};
use crate::patch;
use crate::store::VectorStore;

pub const UPDATE_OK_MESSAGE: &str = "Code updated in both file and database";
pub const UPDATE_FAILED_MESSAGE: &str = "Update failed - check logs for details";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct CodeService {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl CodeService {
    pub fn new(
        config: Arc<Config>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Embed `query` and return the `top_k` nearest chunks.
    pub async fn search(&self, query: &str, top_k: usize) -> ServiceResult<Vec<CodeResult>> {
        let limits = &self.config.search;
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Query cannot be empty or whitespace only".to_string(),
            ));
        }
        if query.chars().count() > limits.max_query_chars {
            return Err(ServiceError::InvalidInput(format!(
                "Query must be at most {} characters",
                limits.max_query_chars
            )));
        }
        if top_k == 0 || top_k > limits.max_top_k {
            return Err(ServiceError::InvalidInput(format!(
                "top_k must be between 1 and {}",
                limits.max_top_k
            )));
        }

        if !self.store.has_collection().await? {
            return Err(ServiceError::NotFound(
                "Collection does not exist; run the upload pipeline first".to_string(),
            ));
        }

        let vector = self.embedder.embed_query(query).await?;
        let hits = self.store.search(&vector, top_k).await?;
        tracing::debug!(query, hits = hits.len(), "search complete");
        Ok(hits.into_iter().map(CodeResult::from).collect())
    }

    /// `workspace.update_root`, else the folder the index pipeline reads.
    ///
    /// `None` when neither is configured and nothing has been uploaded.
    pub fn update_root(&self) -> Option<PathBuf> {
        match &self.config.workspace.update_root {
            Some(root) => Some(absolute_root(root)),
            None => index::resolve_index_root(&self.config)
                .ok()
                .map(|root| absolute_root(&root)),
        }
    }

    /// Map a stored relative path onto the local update root.
    ///
    /// A path that would land outside the root resolves to the root itself.
    pub fn resolve_local_path(&self, file_path: &str) -> Option<PathBuf> {
        let root = self.update_root()?;
        let joined = root.join(file_path.trim_start_matches('/'));
        let normalized = normalize_lexically(&joined);
        if !normalized.starts_with(&root) {
            tracing::warn!(file_path, "path escapes the update root; using the root instead");
            return Some(root);
        }
        Some(normalized)
    }

    /// Replace the code of `chunk_id` in its source file and in the store.
    pub async fn update_chunk(&self, chunk_id: i64, new_code: &str) -> ServiceResult<UpdateOutcome> {
        let new_code = new_code.trim();
        if chunk_id < 0 {
            return Err(ServiceError::InvalidInput(
                "chunk_id must be >= 0".to_string(),
            ));
        }
        if new_code.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Code cannot be empty or whitespace only".to_string(),
            ));
        }
        let max = self.config.search.max_code_chars;
        if new_code.chars().count() > max {
            return Err(ServiceError::InvalidInput(format!(
                "new_code must be at most {} characters",
                max
            )));
        }

        let Some(existing) = self.store.get(chunk_id).await? else {
            tracing::warn!(chunk_id, "chunk not found");
            return Ok(UpdateOutcome {
                success: false,
                chunk_id: Some(chunk_id),
                message: UPDATE_FAILED_MESSAGE.to_string(),
                error: Some(format!("Chunk ID {} not found", chunk_id)),
                ..Default::default()
            });
        };

        let full_path = self.resolve_local_path(&existing.file_path);
        let (file_updated, strategy) = match &full_path {
            Some(path) => match self.update_file(path, &existing.code_snippet, new_code) {
                Ok(strategy) => (strategy.is_some(), strategy),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "file update failed");
                    (false, None)
                }
            },
            None => {
                tracing::warn!("no update root: set workspace.update_root or upload a folder");
                (false, None)
            }
        };

        let database_updated = match self.update_record(&existing, new_code).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(chunk_id, error = %e, "database update failed");
                false
            }
        };

        let success = file_updated && database_updated;
        let error = match (file_updated, database_updated) {
            (true, true) => None,
            (false, true) => Some("Local file was not modified".to_string()),
            (true, false) => Some("Vector database was not updated".to_string()),
            (false, false) => Some("Neither the local file nor the database was updated".to_string()),
        };
        Ok(UpdateOutcome {
            success,
            database_updated,
            file_updated,
            chunk_id: Some(chunk_id),
            file_path: Some(existing.file_path.clone()),
            full_local_path: full_path.map(|p| p.display().to_string()),
            old_code_length: Some(existing.code_snippet.chars().count()),
            new_code_length: Some(new_code.chars().count()),
            strategy,
            message: if success {
                UPDATE_OK_MESSAGE
            } else {
                UPDATE_FAILED_MESSAGE
            }
            .to_string(),
            error,
        })
    }

    /// Returns the strategy used, or `None` when the file was left as is.
    fn update_file(
        &self,
        full_path: &Path,
        old_code: &str,
        new_code: &str,
    ) -> std::io::Result<Option<String>> {
        if self.update_root().as_deref() == Some(full_path) {
            return Ok(None);
        }

        if !full_path.exists() {
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full_path, new_code)?;
            tracing::info!(path = %full_path.display(), "created file with updated code");
            return Ok(Some("created".to_string()));
        }

        let current = std::fs::read_to_string(full_path)?;
        let replacement = patch::apply_replacement(&current, old_code, new_code);
        match replacement.strategy {
            Some(strategy) => {
                std::fs::write(full_path, &replacement.content)?;
                tracing::info!(
                    path = %full_path.display(),
                    %strategy,
                    bytes = replacement.content.len(),
                    "file updated"
                );
                Ok(Some(strategy.to_string()))
            }
            None => {
                tracing::warn!(path = %full_path.display(), "stored code not found in file; file not modified");
                Ok(None)
            }
        }
    }

    async fn update_record(&self, existing: &ChunkRecord, new_code: &str) -> anyhow::Result<()> {
        let text = truncate_text(new_code, self.config.embedding.max_input_chars);
        let vector = self.embedder.embed_query(&text).await?;

        let mut record = existing.clone();
        record.vector = vector;
        record.code_snippet =
            crate::models::clip(new_code, crate::models::MAX_SNIPPET_LEN).to_string();

        self.store.delete(existing.chunk_id).await?;
        self.store.insert(std::slice::from_ref(&record)).await?;
        tracing::info!(chunk_id = existing.chunk_id, "record replaced");
        Ok(())
    }
}

fn absolute_root(root: &Path) -> PathBuf {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(root))
            .unwrap_or_else(|_| root.to_path_buf())
    };
    normalize_lexically(&absolute)
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
