//! CLI binary for handwrite-extract.
//!
//! A thin shim over the library crate: it maps CLI flags to
//! `PipelineConfig`, runs one pipeline, and prints JSON. Pipeline aborts are
//! printed as an error report on stdout and exit with status 2, so scripts can
//! tell "ran but the answer was unrecognized" (status 0) from "could not run".

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use handwrite_extract::config::{DEFAULT_API_KEY, DEFAULT_MODEL, DEFAULT_SERVER};
use handwrite_extract::{
    list_models, ClassifyEnvelope, ClientPool, HandwriteError, Pipeline, PipelineConfig,
    PoolSettings, ServiceEndpoint,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status for a pipeline that could not run to completion.
const EXIT_ABORTED: i32 = 2;

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

fn spinner(prefix: &str, msg: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(style);
    bar.set_prefix(prefix.to_string());
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Verify a signature against an ID card (local Ollama for both stages)
  handwrite verify id_card.jpg signature.png

  # Vision on one server, extraction on another
  handwrite verify id.jpg sig.png \
      --vision-server http://gpu-1:11434/v1 --vision-model qwen3-vl:8b-instruct \
      --text-server   http://gpu-2:8000/v1  --text-model   qwen2.5:14b-instruct

  # Classify document images (label set lives in the prompt)
  handwrite classify front.jpg

  # What does this server actually serve?
  handwrite models --server http://localhost:11434/v1

EXIT STATUS:
  0  pipeline completed (extraction may still be "unrecognized")
  1  usage or internal error
  2  pipeline aborted: unreachable service, unknown model, stream failure,
     or unreadable image. The error report is printed on stdout.

ENVIRONMENT VARIABLES:
  HANDWRITE_VISION_SERVER   Vision service base URL
  HANDWRITE_VISION_MODEL    Vision model ID
  HANDWRITE_VISION_API_KEY  Vision service bearer token
  HANDWRITE_TEXT_SERVER     Extraction service base URL
  HANDWRITE_TEXT_MODEL      Extraction model ID
  HANDWRITE_TEXT_API_KEY    Extraction service bearer token
  RUST_LOG                  Log filter (overrides -v / -q)
"#;

/// Verify handwritten signatures and classify documents with vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "handwrite",
    version,
    about = "Verify handwritten signatures against ID cards using vision LLMs",
    long_about = "Run ID-card and signature images through an OpenAI-compatible vision model, \
then extract a structured verdict with a text model. Works with Ollama, vLLM, LM Studio \
and any other server exposing /models and /chat/completions under its API root.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Overall per-call timeout in seconds, streaming included.
    #[arg(long, global = true, env = "HANDWRITE_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Connection-establishment timeout in seconds.
    #[arg(long, global = true, env = "HANDWRITE_CONNECT_TIMEOUT", default_value_t = 60)]
    connect_timeout: u64,

    /// Disable the spinner.
    #[arg(long, global = true, env = "HANDWRITE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable debug logging (includes the raw extraction output).
    #[arg(short, long, global = true, env = "HANDWRITE_VERBOSE")]
    verbose: bool,

    /// Only print the JSON result.
    #[arg(short, long, global = true, env = "HANDWRITE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Two-stage signature verification: vision transcription, then JSON extraction.
    Verify(VerifyArgs),
    /// Single-stage document classification; prints the model's label verbatim.
    Classify(ClassifyArgs),
    /// List the models a server serves.
    Models(ModelsArgs),
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Image files: the ID card first, then the signature.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[command(flatten)]
    vision: VisionArgs,

    /// Extraction service base URL.
    #[arg(long, env = "HANDWRITE_TEXT_SERVER", default_value = DEFAULT_SERVER)]
    text_server: String,

    /// Extraction model ID.
    #[arg(long, env = "HANDWRITE_TEXT_MODEL", default_value = DEFAULT_MODEL)]
    text_model: String,

    /// Extraction service bearer token.
    #[arg(long, env = "HANDWRITE_TEXT_API_KEY", default_value = DEFAULT_API_KEY, hide_env_values = true)]
    text_api_key: String,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct ClassifyArgs {
    /// Image files to classify.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[command(flatten)]
    vision: VisionArgs,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct ModelsArgs {
    /// Service base URL.
    #[arg(long, env = "HANDWRITE_VISION_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Service bearer token.
    #[arg(long, env = "HANDWRITE_VISION_API_KEY", default_value = DEFAULT_API_KEY, hide_env_values = true)]
    api_key: String,
}

#[derive(Args, Debug)]
struct VisionArgs {
    /// Vision service base URL (a full /chat/completions URL is accepted too).
    #[arg(long, env = "HANDWRITE_VISION_SERVER", default_value = DEFAULT_SERVER)]
    vision_server: String,

    /// Vision model ID.
    #[arg(long, env = "HANDWRITE_VISION_MODEL", default_value = DEFAULT_MODEL)]
    vision_model: String,

    /// Vision service bearer token.
    #[arg(long, env = "HANDWRITE_VISION_API_KEY", default_value = DEFAULT_API_KEY, hide_env_values = true)]
    vision_api_key: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Instruction sent with the images (default: built-in prompt).
    #[arg(long, env = "HANDWRITE_PROMPT", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the instruction from a file.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Max output tokens for the extraction stage.
    #[arg(long, env = "HANDWRITE_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: u32,

    /// Reserved; accepted for compatibility.
    #[arg(long, default_value_t = 2000)]
    max_paras: u32,

    /// Reserved; accepted for compatibility.
    #[arg(long, default_value_t = 5)]
    max_items: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "HANDWRITE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,
}

impl VisionArgs {
    fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(&self.vision_server, &self.vision_model, &self.vision_api_key)
    }
}

/// How a subcommand ended, when it did not hit an internal error.
enum Outcome {
    Completed,
    Aborted,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Pool lifecycle ───────────────────────────────────────────────────
    let pool = Arc::new(ClientPool::http(PoolSettings {
        timeout_secs: cli.timeout,
        connect_timeout_secs: cli.connect_timeout,
        ..PoolSettings::default()
    }));

    let outcome = dispatch(&cli, &pool, show_progress).await;
    pool.release_all().await;

    match outcome? {
        Outcome::Completed => Ok(()),
        Outcome::Aborted => std::process::exit(EXIT_ABORTED),
    }
}

async fn dispatch(cli: &Cli, pool: &Arc<ClientPool>, show_progress: bool) -> Result<Outcome> {
    let pipeline = Pipeline::new(Arc::clone(pool));

    match &cli.command {
        Command::Verify(args) => {
            let config =
                build_config(&args.run, args.vision.endpoint(), Some(text_endpoint(args))).await?;
            let bar = show_progress.then(|| spinner("Verifying", "vision → extraction…"));
            let result = pipeline.verify(&args.images, &config).await;
            finish(bar, cli.quiet, result.map(|out| {
                let verdict = if out.concepts.is_unrecognized() {
                    red("unrecognized")
                } else {
                    green("extracted")
                };
                let note = format!("{verdict}  {}", dim(&format!("vision {:.3}s", out.duration)));
                (out, note)
            }))
        }
        Command::Classify(args) => {
            let config = build_config(&args.run, args.vision.endpoint(), None).await?;
            let bar = show_progress.then(|| spinner("Classifying", "vision…"));
            let result = pipeline.classify(&args.images, &config).await;
            finish(bar, cli.quiet, result.map(|out| {
                let note = format!(
                    "{}  {}",
                    green("classified"),
                    dim(&format!("vision {:.3}s", out.duration))
                );
                (ClassifyEnvelope::from(out), note)
            }))
        }
        Command::Models(args) => {
            match list_models(pool, &args.server, &args.api_key).await {
                Ok(models) => {
                    print_json(&models)?;
                    Ok(Outcome::Completed)
                }
                Err(e) => {
                    print_json(&e.report())?;
                    Ok(Outcome::Aborted)
                }
            }
        }
    }
}

fn text_endpoint(args: &VerifyArgs) -> ServiceEndpoint {
    ServiceEndpoint::new(&args.text_server, &args.text_model, &args.text_api_key)
}

/// Map CLI flags onto a validated `PipelineConfig`.
async fn build_config(
    run: &RunArgs,
    vision: ServiceEndpoint,
    extraction: Option<ServiceEndpoint>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .vision(vision)
        .max_tokens(run.max_tokens)
        .max_paras(run.max_paras)
        .max_items(run.max_items)
        .temperature(run.temperature);

    if let Some(ext) = extraction {
        builder = builder.extraction(ext);
    }

    if let Some(ref p) = run.prompt {
        builder = builder.prompt(p.clone());
    } else if let Some(ref path) = run.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
        builder = builder.prompt(prompt.trim().to_string());
    }

    builder.build().context("Invalid configuration")
}

/// Print the result (or the error report) and stop the spinner.
fn finish<T: Serialize>(
    bar: Option<ProgressBar>,
    quiet: bool,
    result: Result<(T, String), HandwriteError>,
) -> Result<Outcome> {
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    match result {
        Ok((value, note)) => {
            print_json(&value)?;
            if !quiet {
                eprintln!("{} {}", green("✔"), note);
            }
            Ok(Outcome::Completed)
        }
        Err(e) => {
            print_json(&e.report())?;
            if !quiet {
                eprintln!("{} {}", red("✘"), e);
            }
            Ok(Outcome::Aborted)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}
