use anyhow::Result;
use clap::Parser;

use photo_workflow::cli;
use photo_workflow::inputs::{InputKey, InputSources};
use photo_workflow::payload::parse_output4_payload;

#[derive(Parser, Debug)]
#[command(about = "Show where each input resolves from, without touching the network")]
struct Args {
    /// Input bag JSON file, or `-` for stdin
    #[arg(long, default_value = "-")]
    input: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    cli::init_tracing();
    let args = Args::parse();

    let bag = cli::read_json_input(&args.input).await?;
    let sources = InputSources::from_bag(&bag).with_environment(std::env::vars());

    println!("Inputs:");
    for (key, source) in sources.trace() {
        let shown = match (key, source) {
            (_, None) => "-".to_string(),
            // never echo credentials
            (InputKey::Token, Some(src)) => format!("{} (redacted)", src),
            (_, Some(src)) => src.to_string(),
        };
        println!("  {:<22} {}", key.name(), shown);
    }

    match sources.resolve(InputKey::Payload) {
        Some(resolved) => {
            let parsed = parse_output4_payload(&resolved.value);
            let items = parsed.payload.map(|p| p.items.len()).unwrap_or(0);
            println!("Payload: reason={} items={}", parsed.reason, items);
        }
        None => println!("Payload: missing"),
    }
    Ok(())
}
