//! Smoke tests for the `code-rag` binary. Everything here runs offline:
//! the in-memory store and disabled embeddings.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const ENV_OVERRIDES: &[&str] = &[
    "CLUSTER_ENDPOINT",
    "COLLECTION_NAME",
    "FOLDER_TO_UPLOAD",
    "FOLDER_TO_UPDATE",
    "API_BASE_URL",
    "HOST",
    "PORT",
];

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("uploads")).unwrap();

    let config = format!(
        r#"[workspace]
uploads_dir = "{root}/uploads"
update_root = "{root}/uploads/site"

[embedding]
provider = "disabled"

[vector_store]
provider = "memory"
"#,
        root = root.display()
    );
    let config_path = root.join("config/code-rag.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_code-rag"));
    for key in ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    let output = cmd
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run code-rag binary");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, body) in entries {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn help_lists_commands() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, ok) = run(&config, &["--help"]);
    assert!(ok);
    for cmd in ["serve", "index", "upload", "search", "update", "chat", "health"] {
        assert!(stdout.contains(cmd), "missing {} in help", cmd);
    }
    drop(tmp);
}

#[test]
fn upload_extracts_archive() {
    let (tmp, config) = setup_test_env();
    let zip = tmp.path().join("site.zip");
    write_zip(
        &zip,
        &[("site/app.js", "const a = 1;"), ("site/css/main.css", "a { color: red; }")],
    );

    let (stdout, stderr, ok) = run(&config, &["upload", zip.to_str().unwrap()]);
    assert!(ok, "upload failed: {}", stderr);
    assert!(stdout.contains("Extracted 2 files"));
    assert!(tmp.path().join("uploads/site/css/main.css").exists());
}

#[test]
fn upload_replaces_previous_folders() {
    let (tmp, config) = setup_test_env();
    fs::create_dir_all(tmp.path().join("uploads/old")).unwrap();
    let zip = tmp.path().join("site.zip");
    write_zip(&zip, &[("site/app.js", "const a = 1;")]);

    let (_, _, ok) = run(&config, &["upload", zip.to_str().unwrap()]);
    assert!(ok);
    assert!(!tmp.path().join("uploads/old").exists());

    fs::create_dir_all(tmp.path().join("uploads/old")).unwrap();
    let (_, _, ok) = run(&config, &["upload", zip.to_str().unwrap(), "--keep-existing"]);
    assert!(ok);
    assert!(tmp.path().join("uploads/old").exists());
}

#[test]
fn index_without_uploads_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run(&config, &["index"]);
    assert!(!ok);
    assert!(stderr.contains("No folder to index"), "stderr: {}", stderr);
}

#[test]
fn index_with_disabled_embeddings_fails() {
    let (tmp, config) = setup_test_env();
    let zip = tmp.path().join("site.zip");
    write_zip(&zip, &[("site/app.js", "function a() {\n  return 1;\n}\n")]);

    let (_, stderr, ok) = run(&config, &["upload", zip.to_str().unwrap(), "--reindex"]);
    assert!(!ok);
    assert!(stderr.contains("Embeddings are disabled"), "stderr: {}", stderr);
}

#[test]
fn search_without_collection_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run(&config, &["search", "login button"]);
    assert!(!ok);
    assert!(stderr.contains("Collection does not exist"), "stderr: {}", stderr);
}

#[test]
fn update_unknown_chunk_exits_nonzero() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, ok) = run(&config, &["update", "5", "--code", "const b = 2;"]);
    assert!(!ok);
    assert!(stdout.contains("Chunk ID 5 not found"));
}

#[test]
fn update_requires_code_or_file() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run(&config, &["update", "5"]);
    assert!(!ok);
    assert!(stderr.contains("--code") || stderr.contains("--file"));
}
