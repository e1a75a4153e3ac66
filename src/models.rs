//! Core data types that flow through indexing, search and update.

use serde::{Deserialize, Serialize};

/// A unit of indexed code.
///
/// `chunk_id` is unique across one indexing run and doubles as the vector
/// store's primary key. `chunk_index` is the position within its file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub chunk_id: i64,
    pub chunk_index: i64,
    /// Path relative to the index root, using `/` separators.
    pub file_path: String,
    pub file_name: String,
    pub language: String,
    pub code_snippet: String,
    #[serde(default)]
    pub extra_context: String,
}

/// A row in the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
    pub file_path: String,
    pub file_name: String,
    pub language: String,
    pub chunk_index: i64,
    pub code_snippet: String,
}

/// Column limits of the collection schema.
pub const MAX_FILE_PATH_LEN: usize = 512;
pub const MAX_FILE_NAME_LEN: usize = 256;
pub const MAX_LANGUAGE_LEN: usize = 50;
pub const MAX_SNIPPET_LEN: usize = 65_535;

impl ChunkRecord {
    /// Build a record, clipping text columns to the schema limits.
    pub fn from_chunk(chunk: &CodeChunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            vector,
            file_path: clip(&chunk.file_path, MAX_FILE_PATH_LEN).to_string(),
            file_name: clip(&chunk.file_name, MAX_FILE_NAME_LEN).to_string(),
            language: clip(&chunk.language, MAX_LANGUAGE_LEN).to_string(),
            chunk_index: chunk.chunk_index,
            code_snippet: clip(&chunk.code_snippet, MAX_SNIPPET_LEN).to_string(),
        }
    }
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
pub fn clip(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A nearest-neighbour hit from the vector store.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: ChunkRecord,
    /// Inner-product score; higher is more similar.
    pub score: f32,
}

/// A search result as returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeResult {
    pub chunk_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub language: String,
    pub chunk_index: i64,
    pub code_snippet: String,
    pub similarity_score: f32,
}

impl From<SearchHit> for CodeResult {
    fn from(hit: SearchHit) -> Self {
        let r = hit.record;
        Self {
            chunk_id: r.chunk_id,
            file_path: r.file_path,
            file_name: r.file_name,
            language: r.language,
            chunk_index: r.chunk_index,
            code_snippet: r.code_snippet,
            similarity_score: hit.score,
        }
    }
}

/// Result of an update request. Both steps are reported independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub database_updated: bool,
    pub file_updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_code_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_code_length: Option<usize>,
    /// How the edit was located in the file (`exact`, `created`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("hello", 3), "hel");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(clip("aé", 2), "a");
    }

    #[test]
    fn record_clips_snippet() {
        let chunk = CodeChunk {
            chunk_id: 1,
            chunk_index: 0,
            file_path: "a.js".into(),
            file_name: "a.js".into(),
            language: "javascript".into(),
            code_snippet: "x".repeat(MAX_SNIPPET_LEN + 10),
            extra_context: String::new(),
        };
        let rec = ChunkRecord::from_chunk(&chunk, vec![0.0]);
        assert_eq!(rec.code_snippet.len(), MAX_SNIPPET_LEN);
    }

    #[test]
    fn update_outcome_omits_empty_fields() {
        let out = UpdateOutcome {
            message: "nope".into(),
            error: Some("Chunk ID 9 not found".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("file_path").is_none());
        assert_eq!(json["error"], "Chunk ID 9 not found");
    }
}
