//! Zip upload handling.
//!
//! Uploaded source trees arrive as zip archives and are extracted into the
//! uploads directory. Entry names are checked so nothing lands outside the
//! destination, and decompressed sizes are bounded.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Maximum decompressed bytes for a single entry.
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
/// Maximum decompressed bytes for the whole archive.
const MAX_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid zip archive: {0}")]
    Invalid(#[from] zip::result::ZipError),
    #[error("entry escapes destination: {0}")]
    UnsafePath(String),
    #[error("entry {name} exceeds size limit ({limit} bytes)")]
    TooLarge { name: String, limit: u64 },
    #[error("archive exceeds total size limit ({0} bytes)")]
    TotalTooLarge(u64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summary of an extraction.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExtractReport {
    pub files: usize,
    /// Top-level directories created by the archive, sorted.
    pub top_level: Vec<String>,
}

/// Extract `bytes` (a zip archive) into `dest`.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<ExtractReport, ArchiveError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    std::fs::create_dir_all(dest)?;

    let mut files = 0usize;
    let mut total: u64 = 0;
    let mut top_level = BTreeSet::new();

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafePath(name.clone()))?;

        // Skip macOS resource forks that zip tools add next to real files
        if relative.starts_with("__MACOSX") {
            continue;
        }

        if let Some(first) = relative.components().next() {
            if entry.is_dir() || relative.components().count() > 1 {
                top_level.insert(first.as_os_str().to_string_lossy().to_string());
            }
        }

        let out_path = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::new();
        entry.take(MAX_ENTRY_BYTES).read_to_end(&mut buf)?;
        if buf.len() as u64 >= MAX_ENTRY_BYTES {
            return Err(ArchiveError::TooLarge {
                name,
                limit: MAX_ENTRY_BYTES,
            });
        }
        total += buf.len() as u64;
        if total > MAX_TOTAL_BYTES {
            return Err(ArchiveError::TotalTooLarge(MAX_TOTAL_BYTES));
        }

        std::fs::write(&out_path, &buf)?;
        files += 1;
    }

    tracing::info!(files, dest = %dest.display(), "archive extracted");

    Ok(ExtractReport {
        files,
        top_level: top_level.into_iter().collect(),
    })
}

/// Remove every sub-directory of `dir`. Plain files are left alone.
pub fn clear_uploads(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

/// First sub-directory of `dir` by name, if any.
pub fn existing_folder(dir: &Path) -> Option<PathBuf> {
    let mut folders: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    folders.sort();
    folders.into_iter().next()
}

/// Clear existing uploads, then extract the new archive.
///
/// The archive is validated before anything is removed, so a corrupt
/// upload never wipes the previous tree.
pub fn replace_upload(dir: &Path, bytes: &[u8]) -> Result<ExtractReport, ArchiveError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    clear_uploads(dir)?;
    extract_archive(bytes, dir)
}
