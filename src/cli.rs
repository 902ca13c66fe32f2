//! Helpers shared by the binaries.
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Compact tracing to stderr; stdout carries the JSON result.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Read a JSON document from a file, or from stdin when `path` is `-`.
pub async fn read_json_input(path: &str) -> Result<Value> {
    let raw = if path == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read input from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(Path::new(path))
            .await
            .with_context(|| format!("failed to read input file: {}", path))?
    };
    serde_json::from_str(&raw).context("input is not valid JSON")
}
