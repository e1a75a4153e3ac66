//! Locate an indexed snippet inside its file and swap in the edit.
//!
//! The stored snippet may no longer match the file byte for byte: editors
//! strip trailing whitespace, and JSON chunks are pretty-printed from the
//! parsed value. Strategies are tried from strictest to loosest and the
//! first hit wins.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    NormalizedWhitespace,
    Json,
    LineBlock,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Exact => "exact",
            Strategy::NormalizedWhitespace => "normalized_whitespace",
            Strategy::Json => "json",
            Strategy::LineBlock => "line_block",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub content: String,
    /// `None` when `old` could not be found; `content` is then unchanged.
    pub strategy: Option<Strategy>,
}

pub fn apply_replacement(content: &str, old: &str, new: &str) -> Replacement {
    let found = |content: String, strategy| Replacement {
        content,
        strategy: Some(strategy),
    };

    if old.is_empty() {
        return Replacement {
            content: content.to_string(),
            strategy: None,
        };
    }

    if content.contains(old) {
        return found(content.replacen(old, new, 1), Strategy::Exact);
    }

    let norm_content = strip_trailing_whitespace(content);
    let norm_old = strip_trailing_whitespace(old);
    if !norm_old.is_empty() && norm_content.contains(&norm_old) {
        let norm_new = strip_trailing_whitespace(new);
        return found(
            norm_content.replacen(&norm_old, &norm_new, 1),
            Strategy::NormalizedWhitespace,
        );
    }

    if let Some(replaced) = replace_canonical_json(content, old, new) {
        return found(replaced, Strategy::Json);
    }

    if let Some(replaced) = replace_line_block(content, old, new) {
        return found(replaced, Strategy::LineBlock);
    }

    Replacement {
        content: content.to_string(),
        strategy: None,
    }
}

fn strip_trailing_whitespace(text: &str) -> String {
    text.split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn replace_canonical_json(content: &str, old: &str, new: &str) -> Option<String> {
    let file_value: Value = serde_json::from_str(content).ok()?;
    let old_value: Value = serde_json::from_str(old).ok()?;

    let canon_file = canonical_json(&file_value);
    let canon_old = canonical_json(&old_value);
    if !canon_file.contains(&canon_old) {
        return None;
    }

    let canon_new = match serde_json::from_str::<Value>(new) {
        Ok(v) => canonical_json(&v),
        Err(_) => new.to_string(),
    };
    let replaced = canon_file.replacen(&canon_old, &canon_new, 1);

    // Keep the file readable when the result is still valid JSON
    match serde_json::from_str::<Value>(&replaced) {
        Ok(v) => serde_json::to_string_pretty(&v).ok().or(Some(replaced)),
        Err(_) => Some(replaced),
    }
}

fn replace_line_block(content: &str, old: &str, new: &str) -> Option<String> {
    let file_lines: Vec<&str> = content.split('\n').collect();
    let old_lines: Vec<&str> = old.split('\n').collect();
    if old_lines.len() > file_lines.len() {
        return None;
    }

    let start = file_lines
        .windows(old_lines.len())
        .position(|w| w == old_lines.as_slice())?;

    let mut out: Vec<&str> = Vec::with_capacity(file_lines.len());
    out.extend_from_slice(&file_lines[..start]);
    out.extend(new.split('\n'));
    out.extend_from_slice(&file_lines[start + old_lines.len()..]);
    Some(out.join("\n"))
}
