//! Convert a plain-text document into markdown passages.
//!
//! Reads the API key and endpoint from `--api-key`/`--endpoint` or the
//! `CHUNKMARK_API_KEY`/`CHUNKMARK_ENDPOINT` environment variables.
//!
//! # Examples
//!
//! ```sh
//! # Azure OpenAI deployment
//! export CHUNKMARK_API_KEY=...
//! export CHUNKMARK_ENDPOINT=https://my-resource.openai.azure.com/
//! chunkmark rfc8193.txt
//!
//! # OpenAI-compatible endpoint, JSON output, debug logs
//! chunkmark --provider openai --endpoint https://api.openai.com/v1 \
//!   --model gpt-4o --json -v notes.txt > passages.json
//! ```

use std::path::PathBuf;

use chunkmark::prelude::*;
use chunkmark::{DEFAULT_API_VERSION, DEFAULT_MODEL};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Convert a plain-text document into markdown passages with an LLM.
#[derive(Parser)]
#[command(name = "chunkmark", version)]
struct Cli {
    /// Path to the UTF-8 document to convert.
    document: PathBuf,

    // ── Endpoint ───────────────────────────────────────────────
    /// API key for the chat completions endpoint.
    #[arg(long, env = "CHUNKMARK_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Endpoint URL (Azure resource URL or OpenAI-compatible base URL).
    #[arg(long, env = "CHUNKMARK_ENDPOINT")]
    endpoint: String,

    /// Endpoint flavour.
    #[arg(long, value_enum, default_value_t = CliProvider::Azure)]
    provider: CliProvider,

    /// Model, or deployment name for Azure.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Azure OpenAI API version.
    #[arg(long, default_value = DEFAULT_API_VERSION)]
    api_version: String,

    // ── Segmentation ───────────────────────────────────────────
    /// Target segment size in estimated tokens.
    #[arg(long, default_value_t = 500)]
    chunk_size: usize,

    /// Overlap between consecutive segments in estimated tokens.
    #[arg(long, default_value_t = 50)]
    chunk_overlap: usize,

    // ── Sampling ───────────────────────────────────────────────
    /// Maximum tokens per reply (0 = endpoint default).
    #[arg(long, default_value_t = 0)]
    max_tokens: u32,

    /// Sampling temperature.
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    // ── Control ────────────────────────────────────────────────
    /// Fail if the model has not finished after this many iterations.
    #[arg(long, default_value_t = ControllerConfig::DEFAULT_MAX_ITERATIONS)]
    max_iterations: u32,

    /// Retries for transient HTTP failures (429, 5xx, timeouts).
    #[arg(long, default_value_t = 0)]
    transport_retries: u32,

    // ── Output ─────────────────────────────────────────────────
    /// Print the result as JSON instead of framed markdown.
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliProvider {
    Azure,
    #[value(name = "openai")]
    OpenAi,
}

impl From<CliProvider> for Provider {
    fn from(p: CliProvider) -> Self {
        match p {
            CliProvider::Azure => Provider::Azure,
            CliProvider::OpenAi => Provider::OpenAi,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling conversion");
            signal_token.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error ({}): {e}", e.stage());
            if let Some(raw) = e.raw_reply() {
                eprintln!("Last reply: {raw}");
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "chunkmark=info",
        1 => "chunkmark=debug",
        _ => "chunkmark=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), ConvertError> {
    let credentials = Credentials::new(cli.api_key, cli.endpoint)?;
    let config = ConvertConfig {
        model: cli.model,
        api_version: cli.api_version,
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        max_tokens: cli.max_tokens,
        temperature: cli.temperature,
        max_iterations: cli.max_iterations,
        transport_retries: cli.transport_retries,
    };

    let segmenter = config.build_segmenter()?;
    let document = load_document(&cli.document)?;

    let client = ChatClient::new(&credentials, cli.provider.into(), &config.api_version)?;
    let oracle = config.build_oracle(client);

    let controller = WindowController::new(&oracle, config.build_controller_config())
        .with_event_handler(&LoggingHandler)
        .with_cancellation(cancel);

    let result = convert_document(&document, &segmenter, controller).await?;

    if cli.json {
        let out = serde_json::json!({
            "passages": result.passages,
            "iterations": result.iterations,
            "retries": result.retries,
            "usage": {
                "calls": result.usage.calls,
                "prompt_tokens": result.usage.prompt_tokens,
                "completion_tokens": result.usage.completion_tokens,
            },
            "trace_id": result.trace_id,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string())
        );
    } else {
        for (i, passage) in result.passages.iter().enumerate() {
            println!("Markdown chunk #{i}:\n------\n\n{passage}\n\n------");
        }
    }
    Ok(())
}
