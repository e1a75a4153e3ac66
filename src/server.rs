//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service info and endpoint map |
//! | `GET`  | `/health` | Health check |
//! | `POST` | `/api/search` | Semantic search `{ query, top_k? }` |
//! | `POST` | `/api/update` | Update a chunk `{ chunk_id, new_code }` |
//! | `POST` | `/api/upload-all` | Re-index the upload folder |
//! | `POST` | `/api/upload` | Upload a zip (`?replace=true&reindex=false`) |
//! | `POST` | `/tools/rag_search` | Alias of `semantic_search` |
//! | `POST` | `/tools/code_update` | Alias of `update_code` |
//! | `GET`  | `/tools/list` | Registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call any registered tool |
//! | any    | `/mcp` | MCP streamable HTTP |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Query cannot be empty or whitespace only" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `payload_too_large` (413), `internal` (500), `upstream_error` (502).
//!
//! `POST /api/update` answers 200 even when the update did not fully
//! succeed; the body's `success`, `file_updated` and `database_updated`
//! flags say what happened.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tower_http::cors::{Any, CorsLayer};

use crate::archive::{self, ArchiveError, ExtractReport};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::index::{run_index, IndexReport};
use crate::mcp::McpBridge;
use crate::models::{CodeResult, UpdateOutcome};
use crate::service::{CodeService, ServiceError};
use crate::store::{create_store, VectorStore};
use crate::tools::{health_body, validate_params, ToolContext, ToolRegistry};

const AVAILABLE_ENDPOINTS: &[&str] = &[
    "/api/search",
    "/api/update",
    "/api/upload-all",
    "/api/upload",
    "/health",
    "/tools/list",
    "/tools/rag_search",
    "/tools/code_update",
    "/mcp",
];

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    service: CodeService,
    tools: Arc<ToolRegistry>,
    /// Held for the duration of an index run.
    index_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            service: CodeService::new(Arc::new(config), embedder, store),
            tools: Arc::new(ToolRegistry::with_builtins()),
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn service(&self) -> &CodeService {
        &self.service
    }

    pub fn mcp_bridge(&self) -> McpBridge {
        McpBridge::new(self.tools.clone(), ToolContext::new(self.service.clone()))
    }
}

/// Build the service from config and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    let store = create_store(&config.vector_store)?;
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), embedder, store);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("HTTP server listening on http://{}", bind_addr);
    println!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let bridge = state.mcp_bridge();
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );
    let body_limit = state.service.config().server.max_upload_bytes;

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/search", post(handle_search))
        .route("/api/update", post(handle_update))
        .route("/api/upload-all", post(handle_upload_all))
        .route("/api/upload", post(handle_upload))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/rag_search", post(handle_rag_search))
        .route("/tools/code_update", post(handle_code_update))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp)
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::CONFLICT, "conflict", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(m) => bad_request(m),
            ServiceError::NotFound(m) => not_found(m),
            ServiceError::Upstream(e) => {
                tracing::error!(error = %format!("{:#}", e), "upstream failure");
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", format!("{:#}", e))
            }
        }
    }
}

impl From<ArchiveError> for AppError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::TooLarge { .. } | ArchiveError::TotalTooLarge(_) => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                err.to_string(),
            ),
            ArchiveError::Io(e) => internal(e.to_string()),
            other => bad_request(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                rejection.body_text(),
            )
        } else {
            bad_request(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Service errors keep their kind; anything else a tool raises is a 500.
fn tool_failure(tool_name: &str, err: anyhow::Error) -> AppError {
    match err.downcast::<ServiceError>() {
        Ok(service_err) => AppError::from(service_err),
        Err(other) => internal(format!("{}: {:#}", tool_name, other)),
    }
}

// ============ Info / health ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "service": "Vector DB Code Service",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "search": "/api/search",
            "update": "/api/update",
            "upload_all": "/api/upload-all",
            "upload": "/api/upload",
            "health": "/health",
            "tools": "/tools/list",
            "mcp": "/mcp"
        }
    }))
}

async fn handle_health() -> Json<Value> {
    Json(health_body())
}

async fn handle_not_found(uri: Uri) -> Response {
    let body = json!({
        "error": { "code": "not_found", "message": "Endpoint not found" },
        "path": uri.to_string(),
        "available_endpoints": AVAILABLE_ENDPOINTS,
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

// ============ /api/search, /api/update ============

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<CodeResult>,
    pub count: usize,
    pub query: String,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    let top_k = req
        .top_k
        .unwrap_or(state.service.config().search.default_top_k);
    let results = state.service.search(&req.query, top_k).await?;
    Ok(Json(SearchResponse {
        success: true,
        count: results.len(),
        results,
        query: req.query.trim().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub chunk_id: i64,
    pub new_code: String,
}

async fn handle_update(
    State(state): State<AppState>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, AppError> {
    let Json(req) = body?;
    let outcome = state.service.update_chunk(req.chunk_id, &req.new_code).await?;
    Ok(Json(outcome))
}

// ============ /api/upload-all, /api/upload ============

/// Held across every run that reads or replaces the uploaded tree.
fn lock_index(state: &AppState) -> Result<MutexGuard<'_, ()>, AppError> {
    state
        .index_lock
        .try_lock()
        .map_err(|_| conflict("An index run is already in progress"))
}

/// Caller must hold the guard from [`lock_index`].
async fn reindex(state: &AppState) -> Result<IndexReport, AppError> {
    let service = &state.service;
    run_index(service.config(), service.embedder(), service.store())
        .await
        .map_err(|e| {
            tracing::error!(error = %format!("{:#}", e), "upload pipeline failed");
            internal(format!("Upload pipeline failed: {:#}", e))
        })
}

async fn handle_upload_all(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let _guard = lock_index(&state)?;
    tracing::info!("starting full upload pipeline");
    let report = reindex(&state).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Full upload pipeline completed successfully",
        "report": report,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    #[serde(default)]
    pub replace: Option<bool>,
    #[serde(default)]
    pub reindex: Option<bool>,
}

async fn handle_upload(
    State(state): State<AppState>,
    params: Result<Query<UploadParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params?;
    let bytes = body?;
    if bytes.is_empty() {
        return Err(bad_request("Request body must be a zip archive"));
    }

    let _guard = lock_index(&state)?;
    let uploads_dir = state.service.config().workspace.uploads_dir.clone();
    let replace = params.replace.unwrap_or(true);
    let dir = uploads_dir.clone();
    let extracted: ExtractReport = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        if replace {
            archive::replace_upload(&dir, &bytes)
        } else {
            archive::extract_archive(&bytes, &dir)
        }
    })
    .await
    .map_err(|e| internal(e.to_string()))??;

    let folder: Option<PathBuf> = extracted.top_level.first().map(|t| uploads_dir.join(t));
    tracing::info!(files = extracted.files, folder = ?folder, "archive extracted");

    let report = if params.reindex.unwrap_or(false) {
        Some(reindex(&state).await?)
    } else {
        None
    };

    let mut body = json!({
        "success": true,
        "folder": folder.map(|f| f.display().to_string()),
        "files": extracted.files,
    });
    if let Some(report) = report {
        body["report"] = serde_json::to_value(report).map_err(|e| internal(e.to_string()))?;
    }
    Ok(Json(body))
}

// ============ /tools ============

async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.tools.describe() }))
}

async fn call_tool(state: &AppState, name: &str, params: Value) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let validated = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let ctx = ToolContext::new(state.service.clone());
    let result = tool
        .execute(validated, &ctx)
        .await
        .map_err(|e| tool_failure(name, e))?;

    Ok(Json(json!({ "result": result })))
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(params) = body?;
    call_tool(&state, &name, params).await
}

async fn handle_rag_search(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(params) = body?;
    call_tool(&state, "semantic_search", params).await
}

async fn handle_code_update(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(params) = body?;
    call_tool(&state, "update_code", params).await
}
