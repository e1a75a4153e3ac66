//! # code-rag CLI
//!
//! The `code-rag` binary runs the HTTP/MCP service and offers direct access
//! to the pipeline, search and update operations, plus an interactive chat
//! assistant that edits code only with the user's approval.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `code-rag serve` | Start the HTTP API (REST + `/mcp`) |
//! | `code-rag serve --mcp` | Serve MCP over stdio |
//! | `code-rag upload <zip>` | Extract an archive into the uploads folder |
//! | `code-rag index` | Walk, chunk, embed and store the uploaded tree |
//! | `code-rag search "<query>"` | Semantic search |
//! | `code-rag update <chunk_id>` | Replace a chunk in file and store |
//! | `code-rag chat` | Chat with the codebase through the HTTP API |
//! | `code-rag health` | Check a running server |
//!
//! ## Examples
//!
//! ```bash
//! code-rag upload ./site.zip --reindex
//! code-rag search "login button handler" --top-k 3
//! code-rag update 42 --file ./patched.js
//! code-rag serve --config ./config/code-rag.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use code_rag::agent::anthropic::AnthropicClient;
use code_rag::agent::api::ApiClient;
use code_rag::agent::diff::render_diff;
use code_rag::agent::session::{ChatSession, Turn};
use code_rag::config::{self, Config};
use code_rag::embedding::{create_embedder, Embedder};
use code_rag::mcp::McpBridge;
use code_rag::service::CodeService;
use code_rag::store::create_store;
use code_rag::tools::{ToolContext, ToolRegistry};
use code_rag::{archive, index, server};

/// Semantic code search and approval-gated editing over a vector database.
///
/// All commands accept a `--config` flag pointing to a TOML file. A missing
/// file means defaults plus environment overrides.
#[derive(Parser)]
#[command(name = "code-rag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/code-rag.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service.
    ///
    /// Binds to `[server].bind` and serves the REST API with MCP mounted at
    /// `/mcp`. With `--mcp`, speaks MCP over stdin/stdout instead.
    Serve {
        #[arg(long)]
        mcp: bool,
    },

    /// Run the upload pipeline on the configured folder.
    ///
    /// Drops and recreates the collection, then stores every chunk.
    Index,

    /// Extract a zip archive into the uploads folder.
    Upload {
        /// Path to the `.zip` file.
        zip: PathBuf,

        /// Keep previously uploaded folders instead of replacing them.
        #[arg(long)]
        keep_existing: bool,

        /// Run the index pipeline after extraction.
        #[arg(long)]
        reindex: bool,
    },

    /// Search the indexed code.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Replace a chunk's code in its source file and in the store.
    Update {
        chunk_id: i64,

        /// New code, inline.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,

        /// Read the new code from a file.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Chat about the codebase. Edits are shown as diffs and need approval.
    ///
    /// Talks to a running server at `[agent].api_base_url`; needs
    /// `ANTHROPIC_API_KEY`.
    Chat {
        /// Send one message and exit instead of starting a prompt loop.
        #[arg(long)]
        message: Option<String>,
    },

    /// Check that the HTTP API at `[agent].api_base_url` is up.
    Health,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_service(cfg: &Config) -> Result<CodeService> {
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    let store = create_store(&cfg.vector_store)?;
    Ok(CodeService::new(Arc::new(cfg.clone()), embedder, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { mcp: false } => {
            server::run_server(&cfg).await?;
        }
        Commands::Serve { mcp: true } => {
            let service = build_service(&cfg)?;
            McpBridge::new(
                Arc::new(ToolRegistry::with_builtins()),
                ToolContext::new(service),
            )
            .serve_stdio()
            .await?;
        }
        Commands::Index => {
            let service = build_service(&cfg)?;
            let report = index::run_index(&cfg, service.embedder(), service.store()).await?;
            print_report(&report);
        }
        Commands::Upload {
            zip,
            keep_existing,
            reindex,
        } => {
            let bytes = std::fs::read(&zip)
                .with_context(|| format!("Failed to read {}", zip.display()))?;
            let dir = &cfg.workspace.uploads_dir;
            std::fs::create_dir_all(dir)?;
            let extracted = if keep_existing {
                archive::extract_archive(&bytes, dir)?
            } else {
                archive::replace_upload(dir, &bytes)?
            };
            println!("Extracted {} files into {}", extracted.files, dir.display());
            for folder in &extracted.top_level {
                println!("  {}", dir.join(folder).display());
            }

            if reindex {
                let service = build_service(&cfg)?;
                let report = index::run_index(&cfg, service.embedder(), service.store()).await?;
                print_report(&report);
            }
        }
        Commands::Search { query, top_k } => {
            let service = build_service(&cfg)?;
            let top_k = top_k.unwrap_or(cfg.search.default_top_k);
            let results = service.search(&query, top_k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} ({}, chunk_id {})",
                    i + 1,
                    r.similarity_score,
                    r.file_path,
                    r.language,
                    r.chunk_id
                );
                for line in r.code_snippet.lines().take(8) {
                    println!("    {}", line);
                }
                println!();
            }
        }
        Commands::Update {
            chunk_id,
            code,
            file,
        } => {
            let new_code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Pass --code or --file"),
            };
            let service = build_service(&cfg)?;
            let outcome = service.update_chunk(chunk_id, &new_code).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Chat { message } => {
            run_chat(&cfg, message).await?;
        }
        Commands::Health => {
            let api = ApiClient::new(&cfg.agent.api_base_url);
            let body = api.health().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn print_report(report: &index::IndexReport) {
    println!("Indexed {}", report.root.display());
    println!("  files:  {}", report.files);
    for (ext, n) in &report.files_by_extension {
        println!("    {:<6} {}", ext, n);
    }
    println!("  chunks: {}", report.chunks);
    for (lang, n) in &report.chunks_by_language {
        println!("    {:<10} {}", lang, n);
    }
    println!(
        "  started {} ({} ms)",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.elapsed_ms
    );
}

async fn run_chat(cfg: &Config, message: Option<String>) -> Result<()> {
    let api = ApiClient::new(&cfg.agent.api_base_url);
    match api.health().await {
        Ok(_) => println!("Connected to {}", cfg.agent.api_base_url),
        Err(e) => tracing::warn!("service health check failed: {:#}", e),
    }

    let key = config::secret_from_env("ANTHROPIC_API_KEY")?;
    let model = AnthropicClient::new(
        key,
        &cfg.agent.anthropic_base_url,
        &cfg.agent.model,
        cfg.agent.max_tokens,
    )?;
    let mut session = ChatSession::new(Box::new(model), Box::new(api), cfg.agent.max_iterations);

    if let Some(message) = message {
        let turn = session.send(&message).await?;
        return drive(&mut session, turn).await;
    }

    println!("Tools: semantic_search, update_code (with approval). Type 'exit' to quit.");
    loop {
        let input: String = Input::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }
        match session.send(input).await {
            Ok(turn) => {
                if let Err(e) = drive(&mut session, turn).await {
                    eprintln!("Error: {:#}", e);
                }
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}

/// Follow one turn to completion, prompting for every proposed edit.
async fn drive(session: &mut ChatSession, mut turn: Turn) -> Result<()> {
    let mut shown = String::new();
    loop {
        match turn {
            Turn::Complete { text } => {
                let rest = text.strip_prefix(shown.as_str()).unwrap_or(&text).trim();
                if !rest.is_empty() {
                    println!("\n{}\n", rest);
                }
                return Ok(());
            }
            Turn::IterationLimit => {
                println!("\nStopped: reached the iteration limit for this message.\n");
                return Ok(());
            }
            Turn::ApprovalRequired(change) => {
                let note = change.note.strip_prefix(shown.as_str()).unwrap_or(&change.note);
                if !note.trim().is_empty() {
                    println!("\n{}\n", note.trim());
                }
                shown = change.note.clone();

                let location = if change.file_path.is_empty() {
                    format!("chunk {}", change.chunk_id)
                } else {
                    format!("{} (chunk {})", change.file_path, change.chunk_id)
                };
                println!("Proposed change to {}:", location);
                println!("{}", render_diff(&change.old_code, &change.new_code));

                let approved = Confirm::new()
                    .with_prompt("Apply this change?")
                    .default(false)
                    .interact()?;
                turn = if approved {
                    session.approve().await?
                } else {
                    session.reject().await?
                };
            }
        }
    }
}
