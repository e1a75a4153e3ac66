//! Code-aware chunking.
//!
//! Each supported file type has its own splitter that produces pieces
//! aligned with the language's structure rather than fixed-size windows:
//!
//! | Extension | Pieces | Language tag |
//! |-----------|--------|--------------|
//! | `.js` | top-level declarations, exports, expression statements | `javascript` |
//! | `.html` | top-level `<script>` / `<style>` / elements | `javascript` / `css` / `html` |
//! | `.css` | top-level rule sets | `css` |
//! | `.json` | groups of five keys or items | `json` |
//! | `.vue` | template, script and style blocks | `vue-template` / `vue-script` / `vue-style` |
//!
//! Chunk ids are allocated sequentially across one indexing run so they
//! can serve as the vector store's primary key.

pub mod css;
pub mod html;
pub mod js;
pub mod json;
mod scan;
pub mod vue;

use std::collections::BTreeMap;
use std::path::Path;

use crate::models::CodeChunk;
use crate::walker::SourceFile;

/// Extensions with a splitter.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".js", ".html", ".css", ".json", ".vue"];

/// One piece of a file before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub language: &'static str,
    pub text: String,
    /// Named section for multi-part files (Vue).
    pub section: Option<&'static str>,
}

impl Section {
    fn plain(language: &'static str, text: String) -> Self {
        Self {
            language,
            text,
            section: None,
        }
    }
}

/// Split file content by extension. Unsupported extensions yield nothing.
pub fn split(extension: &str, content: &str) -> anyhow::Result<Vec<Section>> {
    let sections = match extension {
        ".js" => js::chunk(content)
            .into_iter()
            .map(|s| Section::plain("javascript", s))
            .collect(),
        ".css" => css::chunk(content)
            .into_iter()
            .map(|s| Section::plain("css", s))
            .collect(),
        ".html" => html::chunk(content)
            .into_iter()
            .map(|(lang, s)| Section::plain(lang, s))
            .collect(),
        ".json" => json::chunk(content)?
            .into_iter()
            .map(|s| Section::plain("json", s))
            .collect(),
        ".vue" => vue::chunk(content)
            .into_iter()
            .map(|(section, s)| Section {
                language: match section {
                    "template" => "vue-template",
                    "script" => "vue-script",
                    _ => "vue-style",
                },
                text: s,
                section: Some(section),
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(sections)
}

/// Hands out sequential chunk ids starting at 0.
#[derive(Debug, Default)]
pub struct ChunkIdAllocator {
    next: i64,
}

impl ChunkIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Turn a file's sections into chunks with ids, per-file indices and context.
pub fn chunk_file(
    file: &SourceFile,
    content: &str,
    ids: &mut ChunkIdAllocator,
) -> anyhow::Result<Vec<CodeChunk>> {
    let sections = split(&file.extension, content)?;
    let file_name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder = parent_folder_name(&file.path);

    Ok(sections
        .into_iter()
        .enumerate()
        .map(|(index, section)| {
            let extra_context = match section.section {
                Some(name) => format!("Folder: {}, Section: {}", folder, name),
                None => format!("Folder: {}", folder),
            };
            CodeChunk {
                chunk_id: ids.next_id(),
                chunk_index: index as i64,
                file_path: file.relative.clone(),
                file_name: file_name.clone(),
                language: section.language.to_string(),
                code_snippet: section.text,
                extra_context,
            }
        })
        .collect())
}

/// Read and chunk every file. Unreadable or unparsable files are skipped
/// with a warning.
pub fn chunk_files(files: &[SourceFile]) -> Vec<CodeChunk> {
    let mut ids = ChunkIdAllocator::new();
    let mut chunks = Vec::new();

    for file in files {
        let content = match std::fs::read_to_string(&file.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(file = %file.path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        match chunk_file(file, &content, &mut ids) {
            Ok(mut c) => chunks.append(&mut c),
            Err(e) => {
                tracing::warn!(file = %file.path.display(), error = %e, "skipping file that failed to parse");
            }
        }
    }

    tracing::info!(chunks = chunks.len(), "code chunks extracted");
    chunks
}

pub fn count_by_language(chunks: &[CodeChunk]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for c in chunks {
        *counts.entry(c.language.clone()).or_insert(0) += 1;
    }
    counts
}

fn parent_folder_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
