//! TOML configuration with environment overrides.
//!
//! Non-secret settings live in a TOML file (default `./config/code-rag.toml`).
//! API keys and the vector database token are only ever read from the
//! environment and are held as [`SecretString`].
//!
//! A missing config file is not an error: the defaults plus environment
//! overrides are enough to run the service, which is how most deployments
//! configure it (`CLUSTER_ENDPOINT`, `FOLDER_TO_UPLOAD`, ...).

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Directory zip uploads are extracted into.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    /// Folder to index. Falls back to the first folder inside `uploads_dir`.
    #[serde(default)]
    pub index_root: Option<PathBuf>,
    /// Folder approved edits are written under. Defaults to the folder
    /// that was indexed, so stored relative paths land on the uploaded tree.
    #[serde(default)]
    pub update_root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            index_root: None,
            update_root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_include_globs() -> Vec<String> {
    ["js", "html", "css", "json", "vue"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inputs longer than this are truncated before embedding.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_dims() -> usize {
    3072
}
fn default_batch_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    30_000
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    /// Cluster endpoint, e.g. `https://in03-xxxx.serverless.gcp-us-west1.cloud.zilliz.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            endpoint: None,
            collection: default_collection(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_provider() -> String {
    "milvus".to_string()
}
fn default_collection() -> String {
    "code_embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_query_chars: default_max_query_chars(),
            max_code_chars: default_max_code_chars(),
        }
    }
}

fn default_top_k() -> usize {
    2
}
fn default_max_top_k() -> usize {
    10
}
fn default_max_query_chars() -> usize {
    500
}
fn default_max_code_chars() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_model")]
    pub model: String,
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Base URL of the code-rag HTTP API the agent calls tools through.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_agent_model(),
            max_tokens: default_agent_max_tokens(),
            max_iterations: default_max_iterations(),
            api_base_url: default_api_base_url(),
            anthropic_base_url: default_anthropic_base_url(),
        }
    }
}

fn default_agent_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_agent_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> usize {
    10
}
fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

/// Load configuration from `path`, apply environment overrides, validate.
///
/// A nonexistent file yields the defaults; a file that exists but fails to
/// parse is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Apply environment overrides through `lookup` (injected for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CLUSTER_ENDPOINT") {
            self.vector_store.endpoint = Some(v);
        }
        if let Some(v) = lookup("COLLECTION_NAME") {
            self.vector_store.collection = v;
        }
        if let Some(v) = lookup("FOLDER_TO_UPLOAD") {
            self.workspace.index_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FOLDER_TO_UPDATE") {
            self.workspace.update_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("API_BASE_URL") {
            self.agent.api_base_url = v;
        }

        let host = lookup("HOST");
        let port = lookup("PORT");
        if host.is_some() || port.is_some() {
            let (cur_host, cur_port) = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(h, p)| (h.to_string(), p.to_string()))
                .unwrap_or_else(|| (self.server.bind.clone(), "8000".to_string()));
            self.server.bind = format!(
                "{}:{}",
                host.unwrap_or(cur_host),
                port.unwrap_or(cur_port)
            );
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.max_top_k == 0 {
            bail!("search.max_top_k must be >= 1");
        }
        if self.search.default_top_k == 0 || self.search.default_top_k > self.search.max_top_k {
            bail!(
                "search.default_top_k must be in 1..={}",
                self.search.max_top_k
            );
        }

        match self.embedding.provider.as_str() {
            "openai" | "disabled" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai or disabled.",
                other
            ),
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims == 0 {
                bail!("embedding.dims must be > 0");
            }
            if self.embedding.batch_size == 0 {
                bail!("embedding.batch_size must be > 0");
            }
        }

        match self.vector_store.provider.as_str() {
            "milvus" => {
                if self.vector_store.endpoint.is_none() {
                    tracing::warn!(
                        "vector_store.endpoint is not set; set CLUSTER_ENDPOINT before indexing or searching"
                    );
                }
            }
            "memory" => {}
            other => bail!(
                "Unknown vector store provider: '{}'. Must be milvus or memory.",
                other
            ),
        }

        if self.agent.max_iterations == 0 {
            bail!("agent.max_iterations must be >= 1");
        }

        Ok(())
    }
}

/// Read a secret from the environment.
pub fn secret_from_env(key: &str) -> Result<SecretString> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(SecretString::from(v)),
        _ => bail!("{} environment variable not set", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_service_conventions() {
        let cfg = Config::default();
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.embedding.model, "text-embedding-3-large");
        assert_eq!(cfg.embedding.dims, 3072);
        assert_eq!(cfg.vector_store.collection, "code_embeddings");
        assert_eq!(cfg.search.default_top_k, 2);
        assert_eq!(cfg.search.max_top_k, 10);
        assert_eq!(cfg.agent.max_iterations, 10);
        assert!(cfg.workspace.include_globs.contains(&"**/*.vue".to_string()));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("CLUSTER_ENDPOINT", "https://cluster.example"),
            ("COLLECTION_NAME", "other"),
            ("FOLDER_TO_UPLOAD", "/data/project"),
            ("FOLDER_TO_UPDATE", "/srv/project"),
            ("PORT", "9100"),
        ]));
        assert_eq!(
            cfg.vector_store.endpoint.as_deref(),
            Some("https://cluster.example")
        );
        assert_eq!(cfg.vector_store.collection, "other");
        assert_eq!(
            cfg.workspace.index_root,
            Some(PathBuf::from("/data/project"))
        );
        assert_eq!(
            cfg.workspace.update_root,
            Some(PathBuf::from("/srv/project"))
        );
        assert_eq!(cfg.server.bind, "0.0.0.0:9100");
    }

    #[test]
    fn host_override_keeps_port() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("HOST", "127.0.0.1")]));
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
[vector_store]
provider = "memory"

[search]
default_top_k = 3
"#,
        )
        .unwrap();
        assert_eq!(cfg.vector_store.provider, "memory");
        assert_eq!(cfg.search.default_top_k, 3);
        assert_eq!(cfg.search.max_top_k, 10);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_default_top_k_above_max() {
        let mut cfg = Config::default();
        cfg.search.default_top_k = 11;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_providers() {
        let mut cfg = Config::default();
        cfg.embedding.provider = "ollama".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.vector_store.provider = "qdrant".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.embedding.batch_size, 50);
    }
}
