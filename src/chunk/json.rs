//! JSON files are split by top-level keys or array items.

use serde_json::{Map, Value};

/// Keys (or array items) per chunk.
const ITEMS_PER_CHUNK: usize = 5;

/// Parse `text` and split it into pretty-printed pieces.
///
/// Objects with more than five keys are split into groups of five keys in
/// source order; arrays likewise by items; anything else is one chunk.
pub fn chunk(text: &str) -> serde_json::Result<Vec<String>> {
    let value: Value = serde_json::from_str(text)?;
    chunk_value(&value)
}

pub fn chunk_value(value: &Value) -> serde_json::Result<Vec<String>> {
    match value {
        Value::Object(map) if map.len() > ITEMS_PER_CHUNK => {
            let entries: Vec<(&String, &Value)> = map.iter().collect();
            entries
                .chunks(ITEMS_PER_CHUNK)
                .map(|group| {
                    let part: Map<String, Value> = group
                        .iter()
                        .map(|(k, v)| ((*k).clone(), (*v).clone()))
                        .collect();
                    serde_json::to_string_pretty(&Value::Object(part))
                })
                .collect()
        }
        Value::Array(items) if items.len() > ITEMS_PER_CHUNK => items
            .chunks(ITEMS_PER_CHUNK)
            .map(|group| serde_json::to_string_pretty(group))
            .collect(),
        other => Ok(vec![serde_json::to_string_pretty(other)?]),
    }
}
