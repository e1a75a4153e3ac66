//! # code-rag
//!
//! Index a zipped source tree into a vector database, search it in natural
//! language, and write approved edits back to both the files on disk and
//! the stored vectors.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Upload  │──▶│ Walk + Chunk │──▶│ Embed + Store │
//! │  (zip)   │   │ js/css/html… │   │ OpenAI/Milvus │
//! └──────────┘   └──────────────┘   └──────┬────────┘
//!                                          │
//!                      ┌───────────────────┼──────────────┐
//!                      ▼                   ▼              ▼
//!                 ┌──────────┐       ┌──────────┐   ┌──────────┐
//!                 │   CLI    │       │   HTTP   │   │   MCP    │
//!                 │ (chat)   │       │  (REST)  │   │ (tools)  │
//!                 └──────────┘       └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Chunks, records, search results, update outcomes |
//! | [`archive`] | Safe zip extraction into the uploads folder |
//! | [`walker`] | Source file discovery |
//! | [`chunk`] | Per-language chunking (JS, CSS, HTML, JSON, Vue) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store abstraction (Milvus REST, in-memory) |
//! | [`index`] | The upload pipeline: walk, chunk, embed, store |
//! | [`patch`] | Locating and replacing a chunk inside its file |
//! | [`service`] | Search and update over the store and files |
//! | [`tools`] | Tool registry shared by HTTP and MCP |
//! | [`server`] | HTTP API |
//! | [`mcp`] | MCP bridge |
//! | [`agent`] | Chat assistant with approval-gated edits |

pub mod agent;
pub mod archive;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod index;
pub mod mcp;
pub mod models;
pub mod patch;
pub mod server;
pub mod service;
pub mod store;
pub mod tools;
pub mod walker;
