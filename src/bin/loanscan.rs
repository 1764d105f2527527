//! CLI binary for loanscan.
//!
//! `loanscan serve` runs the HTTP API; `loanscan extract` pushes one local
//! file through the same pipeline and prints the resulting record.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use loanscan::config::parse_utc_offset;
use loanscan::pipeline::input::sniff_kind;
use loanscan::server::{self, AppState};
use loanscan::{
    Document, DocumentStatus, DocumentStore, LoanField, MemoryDocumentStore, NewDocument,
    Pipeline, PipelineConfig, ServerConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the API on port 8080 with uploads in ./data
  loanscan serve --port 8080 --upload-dir ./data

  # Filter uploads by day in Vietnam local time
  loanscan serve --utc-offset +07:00

  # Extract one file and print the fields
  loanscan extract contract.pdf

  # Same, as the full JSON record
  loanscan extract --json id-card.jpg > record.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Provider (openai, anthropic, gemini, ollama, ...)
  EDGEQUAKE_MODEL         Model ID (default: gpt-4.1-mini)
  PDFIUM_LIB_PATH         Directory or file of an existing libpdfium
  LOANSCAN_*              Every flag below has a LOANSCAN_ equivalent
"#;

/// Extract loan fields from scanned documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "loanscan",
    version,
    about = "Extract loan fields from scanned contracts and ID documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LOANSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LOANSCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Process one local PDF / JPEG / PNG and print the result.
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "LOANSCAN_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent VLM calls per document.
    #[arg(long, global = true, env = "LOANSCAN_PAGE_CONCURRENCY", default_value_t = 4)]
    page_concurrency: usize,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, global = true, env = "LOANSCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Max LLM output tokens per page.
    #[arg(long, global = true, env = "LOANSCAN_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "LOANSCAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Directory or file of an existing libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "LOANSCAN_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "LOANSCAN_PORT", default_value_t = 3000)]
    port: u16,

    /// Directory uploaded files are written to.
    #[arg(long, env = "LOANSCAN_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "LOANSCAN_MAX_UPLOAD_MB", default_value_t = 20)]
    max_upload_mb: usize,

    /// Documents processed at the same time.
    #[arg(long, env = "LOANSCAN_MAX_CONCURRENT", default_value_t = 4)]
    max_concurrent: usize,

    /// Offset used for `uploadDate` filters (e.g. +07:00, Z).
    #[arg(long, env = "LOANSCAN_UTC_OFFSET", default_value = "Z")]
    utc_offset: String,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Local PDF, JPEG or PNG file.
    input: PathBuf,

    /// Print the full document record as JSON.
    #[arg(long, env = "LOANSCAN_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The extract spinner provides the feedback; keep library INFO logs out
    // of its way unless asked for.
    let spinner = matches!(cli.command, Command::Extract(ref a) if !a.json) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Serve(args) => run_serve(&cli.pipeline, args).await,
        Command::Extract(args) => run_extract(&cli.pipeline, args, spinner, cli.quiet).await,
    }
}

async fn run_serve(pipeline_args: &PipelineArgs, args: &ServeArgs) -> Result<()> {
    let reference_tz = parse_utc_offset(&args.utc_offset).context("Invalid --utc-offset")?;
    let server_config = ServerConfig {
        upload_dir: args.upload_dir.clone(),
        max_upload_bytes: args.max_upload_mb.max(1) * 1024 * 1024,
    };

    let config = build_config(pipeline_args, args.max_concurrent).await?;
    let store: Arc<dyn DocumentStore> =
        Arc::new(MemoryDocumentStore::with_reference_tz(reference_tz));
    let pipeline =
        Arc::new(Pipeline::from_config(store, config).context("Failed to set up the pipeline")?);

    let state = AppState::new(pipeline, server_config);
    server::serve(state, &args.host, args.port)
        .await
        .context("Server error")
}

async fn run_extract(
    pipeline_args: &PipelineArgs,
    args: &ExtractArgs,
    spinner: bool,
    quiet: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let (file_type, mime_type) = sniff_kind(&bytes).with_context(|| {
        format!(
            "{} is not a PDF, JPEG or PNG file",
            args.input.display()
        )
    })?;

    let config = build_config(pipeline_args, 1).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let pipeline =
        Arc::new(Pipeline::from_config(store, config).context("Failed to set up the pipeline")?);

    let name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.display().to_string());

    let bar = spinner.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Extracting");
        bar.set_message(name.clone());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let (doc, handle) = pipeline
        .enqueue(NewDocument {
            filename: name.clone(),
            original_name: name,
            file_type,
            mime_type: mime_type.to_string(),
            file_size: bytes.len() as u64,
            file_path: args.input.clone(),
        })
        .await;
    handle.await.context("Extraction task panicked")?;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let done = pipeline
        .store()
        .get(doc.id)
        .await
        .context("Document record disappeared")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&done).context("Failed to serialise record")?
        );
    } else {
        print_summary(&done, quiet);
    }

    if done.status != DocumentStatus::Processed {
        anyhow::bail!(
            "Extraction failed: {}",
            done.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_summary(doc: &Document, quiet: bool) {
    let Some(ref data) = doc.extracted_data else {
        return;
    };
    for field in LoanField::ALL {
        match data.value(field) {
            Some(value) => println!(
                "{:<14} {}  {}",
                field.wire_name(),
                value,
                dim(&format!("({}%)", data.confidence_of(field)))
            ),
            None => println!("{:<14} {}", field.wire_name(), dim("-")),
        }
    }
    if !quiet {
        let found = data.fields_found.len();
        eprintln!(
            "{} {}/{} fields  confidence {}%  {}ms",
            if found > 0 { green("✔") } else { red("✘") },
            bold(&found.to_string()),
            LoanField::ALL.len(),
            doc.confidence.unwrap_or(0),
            doc.processing_time.unwrap_or(0),
        );
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &PipelineArgs, max_concurrent: usize) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .page_concurrency(cli.page_concurrency)
        .max_concurrent_documents(max_concurrent)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }

    builder.build().context("Invalid configuration")
}
