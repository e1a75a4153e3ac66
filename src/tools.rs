//! Tools exposed to agents over HTTP and MCP.
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │             ToolRegistry              │
//! │  semantic_search  update_code  health │
//! └──────────────┬────────────────────────┘
//!                ▼
//!   POST /tools/{name}   ·   MCP tools/call
//! ```
//!
//! Every tool receives its parameters already checked against its schema
//! by [`validate_params`], with schema defaults filled in.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::service::{CodeService, ServiceError};

/// Service name reported by health checks.
pub const SERVICE_NAME: &str = "vector-db-code-service";

/// A tool agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route segment and MCP tool name, e.g. `"semantic_search"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Marked `"builtin": true` in `GET /tools/list`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// Tools that only read are annotated as such for MCP clients.
    fn read_only(&self) -> bool {
        true
    }

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run with validated parameters. The value is wrapped in
    /// `{ "result": ... }` by the HTTP layer.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    service: CodeService,
}

impl ToolContext {
    pub fn new(service: CodeService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &CodeService {
        &self.service
    }
}

// ============ Built-ins ============

pub struct SemanticSearchTool;

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        "semantic_search"
    }

    fn description(&self) -> &str {
        "Search the indexed codebase for code snippets semantically similar to a natural-language query. Returns chunk ids, file paths and the code of each match."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for, in plain language" },
                "top_k": { "type": "integer", "description": "Number of results (1-10)", "default": 2 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        let limits = &ctx.service().config().search;
        let top_k = match params["top_k"].as_i64() {
            None => limits.default_top_k,
            Some(k) => usize::try_from(k).map_err(|_| {
                ServiceError::InvalidInput(format!(
                    "top_k must be between 1 and {}",
                    limits.max_top_k
                ))
            })?,
        };

        let results = ctx.service().search(query, top_k).await?;
        Ok(json!({
            "results": results,
            "count": results.len(),
            "query": query.trim(),
        }))
    }
}

pub struct UpdateCodeTool;

#[async_trait]
impl Tool for UpdateCodeTool {
    fn name(&self) -> &str {
        "update_code"
    }

    fn description(&self) -> &str {
        "Replace the code of an indexed chunk. Writes the new code into the local source file and re-embeds the chunk in the vector database. Use a chunk_id returned by semantic_search."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn read_only(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chunk_id": { "type": "integer", "description": "Chunk id from a search result" },
                "new_code": { "type": "string", "description": "Complete replacement code for the chunk" }
            },
            "required": ["chunk_id", "new_code"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let Some(chunk_id) = params["chunk_id"].as_i64() else {
            bail!("chunk_id must be an integer");
        };
        let new_code = params["new_code"].as_str().unwrap_or("");
        let outcome = ctx.service().update_chunk(chunk_id, new_code).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

pub struct HealthCheckTool;

#[async_trait]
impl Tool for HealthCheckTool {
    fn name(&self) -> &str {
        "health_check"
    }

    fn description(&self) -> &str {
        "Check that the code service is running"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(health_body())
    }
}

pub fn health_body() -> Value {
    json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    })
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SemanticSearchTool));
        registry.register(Box::new(UpdateCodeTool));
        registry.register(Box::new(HealthCheckTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// `GET /tools/list` entries.
    pub fn describe(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "builtin": t.is_builtin(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Check `params` against a tool schema and fill in defaults.
///
/// Only what the built-in schemas declare is enforced: `required` fields,
/// `string`/`integer` property types and `default` values.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut params = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => bail!("parameters must be a JSON object"),
    };

    for field in schema["required"].as_array().into_iter().flatten() {
        if let Some(field) = field.as_str() {
            if !params.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    let Some(properties) = schema["properties"].as_object() else {
        return Ok(Value::Object(params));
    };
    for (name, prop) in properties {
        if !params.contains_key(name) {
            if let Some(default) = prop.get("default") {
                params.insert(name.clone(), default.clone());
            }
            continue;
        }
        let value = &params[name];
        let matches = match prop["type"].as_str() {
            Some("string") => value.is_string(),
            Some("integer") => value.is_i64() || value.is_u64(),
            _ => true,
        };
        if !matches {
            bail!(
                "parameter '{}' must be of type '{}'",
                name,
                prop["type"].as_str().unwrap_or_default()
            );
        }
    }

    Ok(Value::Object(params))
}
