use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
    /// Extension including the dot (`.js`), or empty.
    pub extension: String,
}

pub fn discover_files(
    root: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        bail!("Index root does not exist: {}", root.display());
    }

    let include_set = build_globset(include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ];
    default_excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        files.push(SourceFile {
            path: path.to_path_buf(),
            relative: rel_str,
            extension,
        });
    }

    // Sort for deterministic chunk ids
    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(files)
}

pub fn count_by_extension(files: &[SourceFile]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for f in files {
        *counts.entry(f.extension.clone()).or_insert(0) += 1;
    }
    counts
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
