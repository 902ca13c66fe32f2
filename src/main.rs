use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::error;

use photo_workflow::bubble::BubbleClient;
use photo_workflow::cli;
use photo_workflow::config;
use photo_workflow::driver;
use photo_workflow::inputs::InputSources;
use photo_workflow::model::{LogDetail, OutputShape};
use photo_workflow::report;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Upload new photos and create or update photo records from a JSON input bag"
)]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input bag JSON file, or `-` for stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Read every record back after writing it
    #[arg(long)]
    verify: bool,

    /// Log per-file upload detail
    #[arg(long)]
    verbose: bool,

    /// Output document shape
    #[arg(long, value_enum)]
    shape: Option<OutputShape>,

    /// Exit non-zero when the run stops before processing items
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    cli::init_tracing();

    let args = Args::parse();
    let mut cfg = config::load_or_default(args.config.as_deref())?;
    if args.verify {
        cfg.bubble.verify_after_write = true;
    }
    if args.verbose {
        cfg.app.log_detail = LogDetail::Verbose;
    }
    if let Some(shape) = args.shape {
        cfg.app.output_shape = shape;
    }

    let bag = cli::read_json_input(&args.input).await?;
    let sources = InputSources::from_bag(&bag).with_environment(std::env::vars());

    let result = driver::run_batch(&cfg, &sources, BubbleClient::from_run_config).await;
    let output = report::render_output(&result, cfg.app.output_shape, cfg.app.max_log_chars);
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.strict && result.state.is_terminal_failure() {
        error!(state = result.state.as_str(), "run stopped before processing items");
        bail!("run stopped in state {}", result.state.as_str());
    }
    Ok(())
}
