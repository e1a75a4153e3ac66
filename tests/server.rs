//! HTTP API tests against the router served on an ephemeral port, backed by
//! the in-memory store and a deterministic keyword embedder.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use code_rag::config::Config;
use code_rag::embedding::Embedder;
use code_rag::server::{build_router, AppState};
use code_rag::store::memory::MemoryStore;

const APP_JS: &str = "function login() {\n  return 'Login';\n}\n\nfunction logout() {\n  return 'Logout';\n}\n";
const STYLE_CSS: &str = ".header {\n  color: red;\n}\n";

/// One dimension per vocabulary word (occurrence count), plus a constant.
/// `delay` stretches every call so overlapping requests can be observed.
struct WordEmbedder {
    vocab: Vec<&'static str>,
    delay: Duration,
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "words"
    }

    fn dims(&self) -> usize {
        self.vocab.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = self
                    .vocab
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect();
                v.push(0.01);
                v
            })
            .collect())
    }
}

fn make_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        for (name, body) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.workspace.uploads_dir = root.join("uploads");
    config.vector_store.provider = "memory".into();
    config
}

/// Serve the router on 127.0.0.1:0 and return its base URL.
async fn spawn(config: Config) -> String {
    spawn_with_delay(config, Duration::ZERO).await
}

async fn spawn_with_delay(config: Config, delay: Duration) -> String {
    let embedder = Arc::new(WordEmbedder {
        vocab: vec!["login", "logout", "header"],
        delay,
    });
    let state = AppState::new(config, embedder, Arc::new(MemoryStore::new()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn post_json(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn upload_site(base: &str) -> Value {
    let zip = make_zip(&[("site/app.js", APP_JS), ("site/style.css", STYLE_CSS)]);
    let resp = reqwest::Client::new()
        .post(format!("{}/api/upload?reindex=true", base))
        .header("content-type", "application/zip")
        .body(zip)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_and_root() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;

    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "vector-db-code-service");

    let root: Value = reqwest::get(format!("{}/", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["status"], "running");
    assert_eq!(root["endpoints"]["search"], "/api/search");
}

#[tokio::test]
async fn unknown_path_lists_endpoints() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;

    let resp = reqwest::get(format!("{}/nope", base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["available_endpoints"].as_array().unwrap().len() > 3);
}

#[tokio::test]
async fn search_before_indexing_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;

    let (status, body) = post_json(&base, "/api/search", json!({ "query": "login" })).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn search_validates_input() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;

    let (status, body) = post_json(&base, "/api/search", json!({ "query": "   " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = post_json(&base, "/api/search", json!({ "query": "x", "top_k": 50 })).await;
    assert_eq!(status, 400);

    let (status, body) = post_json(&base, "/api/search", json!({ "top_k": 2 })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn upload_index_search_update() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;

    let uploaded = upload_site(&base).await;
    assert_eq!(uploaded["success"], true);
    assert_eq!(uploaded["files"], 2);
    assert_eq!(uploaded["report"]["files"], 2);
    assert!(uploaded["report"]["chunks"].as_u64().unwrap() >= 3);

    let (status, body) = post_json(&base, "/api/search", json!({ "query": "login", "top_k": 1 })).await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    let hit = &body["results"][0];
    assert_eq!(hit["file_path"], "app.js");
    assert_eq!(hit["language"], "javascript");
    assert!(hit["code_snippet"].as_str().unwrap().contains("return 'Login'"));
    let chunk_id = hit["chunk_id"].as_i64().unwrap();

    let new_code = "function login() {\n  return 'Sign in';\n}";
    let (status, outcome) = post_json(
        &base,
        "/api/update",
        json!({ "chunk_id": chunk_id, "new_code": new_code }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["file_updated"], true);
    assert_eq!(outcome["database_updated"], true);
    assert_eq!(outcome["strategy"], "exact");
    // no update_root configured: edits land in the indexed folder
    let local = outcome["full_local_path"].as_str().unwrap();
    assert!(Path::new(local).ends_with("uploads/site/app.js"), "{}", local);

    let on_disk = std::fs::read_to_string(tmp.path().join("uploads/site/app.js")).unwrap();
    assert!(on_disk.contains("return 'Sign in';"));
    assert!(on_disk.contains("return 'Logout';"));

    let (_, body) = post_json(&base, "/api/search", json!({ "query": "login", "top_k": 1 })).await;
    assert_eq!(body["results"][0]["chunk_id"], chunk_id);
    assert_eq!(body["results"][0]["code_snippet"], new_code);
}

#[tokio::test]
async fn update_unknown_chunk_reports_failure() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;
    upload_site(&base).await;

    let (status, outcome) = post_json(
        &base,
        "/api/update",
        json!({ "chunk_id": 9999, "new_code": "const x = 1;" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["error"], "Chunk ID 9999 not found");
}

#[tokio::test]
async fn tools_endpoints() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;
    upload_site(&base).await;

    let listed: Value = reqwest::get(format!("{}/tools/list", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"semantic_search"));
    assert!(names.contains(&"update_code"));

    let (status, body) = post_json(&base, "/tools/rag_search", json!({ "query": "header" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["query"], "header");
    assert_eq!(body["result"]["results"][0]["language"], "css");

    let (status, body) = post_json(&base, "/tools/semantic_search", json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = post_json(&base, "/tools/does_not_exist", json!({})).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn corrupt_upload_is_rejected_and_keeps_previous_tree() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;
    upload_site(&base).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/upload", base))
        .body("definitely not a zip")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert!(tmp.path().join("uploads/site/app.js").exists());
}

#[tokio::test]
async fn rag_search_rejects_out_of_range_top_k() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;
    upload_site(&base).await;

    for top_k in [-1, 0, 50] {
        let (status, body) = post_json(
            &base,
            "/tools/rag_search",
            json!({ "query": "login", "top_k": top_k }),
        )
        .await;
        assert_eq!(status, 400, "top_k {}", top_k);
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(body["error"]["message"].as_str().unwrap().contains("top_k"));
    }

    let (status, body) = post_json(&base, "/tools/rag_search", json!({ "query": "login", "top_k": 2 })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn overlapping_index_runs_conflict() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_with_delay(test_config(tmp.path()), Duration::from_millis(600)).await;

    let zip = make_zip(&[("site/app.js", APP_JS), ("site/style.css", STYLE_CSS)]);
    let resp = reqwest::Client::new()
        .post(format!("{}/api/upload", base))
        .body(zip.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let first = post_json(&base, "/api/upload-all", json!({}));
    let second = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        post_json(&base, "/api/upload-all", json!({})).await
    };
    let ((s1, b1), (s2, b2)) = tokio::join!(first, second);
    assert_eq!(s1, 200, "{}", b1);
    assert_eq!(s2, 409, "{}", b2);
    assert_eq!(b2["error"]["code"], "conflict");

    // an upload may not replace the tree under a running index
    let first = post_json(&base, "/api/upload-all", json!({}));
    let second = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        reqwest::Client::new()
            .post(format!("{}/api/upload", base))
            .body(zip.clone())
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    };
    let ((s1, _), s2) = tokio::join!(first, second);
    assert_eq!(s1, 200);
    assert_eq!(s2, 409);
}

const MCP_ACCEPT: &str = "application/json, text/event-stream";

async fn mcp_post(base: &str, session: Option<&str>, body: Value) -> reqwest::Response {
    let mut req = reqwest::Client::new()
        .post(format!("{}/mcp", base))
        .header("accept", MCP_ACCEPT)
        .header("content-type", "application/json")
        .json(&body);
    if let Some(id) = session {
        req = req
            .header("mcp-session-id", id)
            .header("mcp-protocol-version", "2025-03-26");
    }
    req.send().await.unwrap()
}

/// The JSON-RPC response with `id`, from a plain JSON or an SSE body.
async fn read_rpc(mut resp: reqwest::Response, id: u64) -> Value {
    let is_json = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        return resp.json().await.unwrap();
    }

    let read = async {
        let mut buf = String::new();
        loop {
            let chunk = resp.chunk().await.unwrap().expect("stream ended before response");
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if let Ok(msg) = serde_json::from_str::<Value>(data) {
                    if msg["id"] == id {
                        return msg;
                    }
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), read)
        .await
        .expect("timed out waiting for MCP response")
}

#[tokio::test]
async fn mcp_lists_and_calls_tools() {
    let tmp = TempDir::new().unwrap();
    let base = spawn(test_config(tmp.path())).await;
    upload_site(&base).await;

    let resp = mcp_post(
        &base,
        None,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "server-tests", "version": "0" }
            }
        }),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 200);
    let session = resp
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("session id header");
    let init = read_rpc(resp, 1).await;
    assert!(init["result"]["capabilities"]["tools"].is_object(), "{}", init);

    let resp = mcp_post(
        &base,
        Some(&session),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 202);

    let resp = mcp_post(
        &base,
        Some(&session),
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {} }),
    )
    .await;
    let listed = read_rpc(resp, 2).await;
    let names: Vec<&str> = listed["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"semantic_search"), "{:?}", names);
    assert!(names.contains(&"update_code"));

    let resp = mcp_post(
        &base,
        Some(&session),
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "semantic_search", "arguments": { "query": "login", "top_k": 1 } }
        }),
    )
    .await;
    let called = read_rpc(resp, 3).await;
    assert_ne!(called["result"]["isError"], true, "{}", called);
    let text = called["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("app.js"), "{}", text);
}
