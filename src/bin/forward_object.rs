use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use photo_workflow::bubble::BubbleClient;
use photo_workflow::cli;
use photo_workflow::config::{self, Environment};
use photo_workflow::forward::{self, ForwardRequest};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Forward a key/value payload to the apicreateobject workflow, uploading base64 fields as photos"
)]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON `{ "authData": { "access_token" }, "inputData": { ... } }`, or `-` for stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Bearer token; overrides authData.access_token
    #[arg(long)]
    token: Option<String>,

    /// Target app version; the workflow endpoints live on the live version
    #[arg(long, default_value = "live")]
    env: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    cli::init_tracing();

    let args = Args::parse();
    let cfg = config::load_or_default(args.config.as_deref())?;
    let bundle = cli::read_json_input(&args.input).await?;

    let token = args
        .token
        .or_else(|| {
            bundle
                .pointer("/authData/access_token")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| cfg.bubble.token.clone())
        .filter(|t| !t.trim().is_empty())
        .context("no access token: pass --token or authData.access_token")?;
    let fields = bundle
        .get("inputData")
        .and_then(Value::as_object)
        .cloned()
        .context("input has no inputData object")?;

    let base = config::api_base(
        &config::normalize_domain(&cfg.app.domain),
        Environment::parse_loose(&args.env),
    );
    let client = BubbleClient::for_workflows(
        &base,
        token,
        Duration::from_secs(cfg.app.http_timeout_secs),
    )?;

    info!(%base, fields = fields.len(), "forwarding object");
    let result = forward::forward(&client, &ForwardRequest::new(fields)).await?;
    let output = json!({
        "createdphotos": result.created_photos,
        "response": result.response,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_live_unless_told_otherwise() {
        let args = Args::parse_from(["forward_object"]);
        assert_eq!(Environment::parse_loose(&args.env), Environment::Live);

        let args = Args::parse_from(["forward_object", "--env", "version-test"]);
        assert_eq!(Environment::parse_loose(&args.env), Environment::VersionTest);
    }
}
