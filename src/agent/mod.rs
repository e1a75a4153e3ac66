//! Interactive coding assistant.
//!
//! A chat model (Anthropic Messages API) drives two tools backed by the
//! running service's HTTP API: `semantic_search` and `update_code`.
//! Edits pause in [`session::ChatSession`] until the user approves them.

pub mod anthropic;
pub mod api;
pub mod diff;
pub mod session;

use serde_json::json;

use anthropic::ToolDefinition;

/// Tools offered to the model on every turn.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "semantic_search".into(),
            description: "Semantic search for similar code snippets. Extract the main \
                          target/component from the user's query and search for that."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "top_k": { "type": "integer", "default": 2 }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "update_code".into(),
            description: "Update a code chunk in the codebase. Only use this if the user \
                          wants to modify, add, remove or update code. The user must \
                          approve every change before it is applied."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "chunk_id": {
                        "type": "integer",
                        "description": "The chunk_id from semantic_search results"
                    },
                    "new_code": {
                        "type": "string",
                        "description": "The complete updated code"
                    }
                },
                "required": ["chunk_id", "new_code"]
            }),
        },
    ]
}
