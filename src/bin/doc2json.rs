//! CLI binary for edgequake-doc2json.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and a model backend, then prints the result JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2json::pipeline::detect::SUPPORTED_EXTENSIONS;
use edgequake_doc2json::pipeline::input::load_input;
use edgequake_doc2json::{
    NoEnhancement, OpenAiCompatibleConfig, OpenAiCompatibleModel, Pipeline, PipelineConfig,
    PipelineProgressCallback, PipelineResult, ProgressCallback, ProviderModel, Stage,
    VisionLanguageModel,
};
use edgequake_llm::ProviderFactory;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while detecting/extracting, then a bar over the OCR calls.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        match stage {
            Stage::Detecting => self.bar.set_message("detecting file type…"),
            Stage::Extracting => self.bar.set_message("extracting images…"),
            Stage::Transcribing => self.bar.set_prefix("Transcribing"),
            Stage::ExtractingJson => {
                self.bar.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_strings(TICKS),
                );
                self.bar.set_prefix("Extracting");
                self.bar.set_message("tables → JSON…");
            }
            Stage::Done => {}
        }
    }

    fn on_images_extracted(&self, count: usize) {
        self.bar.set_length(count as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} images  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.reset_eta();
    }

    fn on_image_complete(&self, index: usize, total: usize, markdown_len: usize) {
        let mark = if markdown_len == 0 { dim("·") } else { green("✓") };
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            mark,
            index,
            total,
            dim(&format!("{markdown_len:>6} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_finished(&self, success: bool) {
        self.bar.finish_and_clear();
        let secs = self.started.elapsed().as_secs_f64();
        if success {
            eprintln!("{} done in {:.1}s", green("✔"), secs);
        } else {
            eprintln!("{} failed after {:.1}s", red("✘"), secs);
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract tables from a scanned balance sheet (JSON on stdout)
  doc2json balance.pdf

  # Write the result to a file
  doc2json balance.pdf -o balance.json

  # Only run OCR and print the intermediate Markdown
  doc2json --markdown-only scan.jpg

  # Self-hosted vLLM endpoint
  doc2json --api-url http://gpu-box:8000/v1 --model qwen3vl-8b-instruct-fp8 report.docx

  # Hosted provider through edgequake-llm
  doc2json --provider openai --model gpt-4.1 balance.pdf

SUPPORTED FILES:
  .pdf .docx .jpg .jpeg .png .gif .bmp .tiff .tif .webp
  (detected from content first, extension only as a fallback)

OUTPUT:
  Success: {"message": {...5 tables: "OK"|"Missing"}, "xlsx": null, "tables_data": {...}}
  Failure: {"error": "..."}   (exit status 1)

ENVIRONMENT VARIABLES:
  VLM_API_URL             OpenAI-compatible endpoint (default http://host.docker.internal:8000/v1)
  VLM_API_KEY             Endpoint key (default token-abc)
  VLM_MODEL_NAME          Model ID (default qwen3vl-8b-instruct-fp8)
  DOC2JSON_PROVIDER       Use an edgequake-llm provider instead of the endpoint
  DOC2JSON_DPI            PDF rendering DPI (default 150)
  DOC2JSON_MAX_TILE_SIZE  Maximum tile edge in px (default 4096)
  DOC2JSON_TILE_OVERLAP   Overlap between tiles in px (default 120)
  DOC2JSON_CONCURRENCY    OCR calls in flight (default 1)
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract balance-sheet tables from scanned documents into JSON.
#[derive(Parser, Debug)]
#[command(
    name = "doc2json",
    version,
    about = "Extract balance-sheet tables from scanned PDF, DOCX and image files into JSON",
    long_about = "Two-pass extraction with a Vision Language Model: every page image is \
transcribed to Markdown, then the Markdown is mapped onto the balance-sheet schema.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL (PDF, DOCX or image).
    input: String,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "DOC2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Stop after OCR and output the Markdown.
    #[arg(long)]
    markdown_only: bool,

    /// Single-line JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// OpenAI-compatible endpoint including `/v1`.
    #[arg(long, env = "VLM_API_URL", default_value = "http://host.docker.internal:8000/v1")]
    api_url: String,

    /// Endpoint key.
    #[arg(long, env = "VLM_API_KEY", default_value = "token-abc", hide_env_values = true)]
    api_key: String,

    /// Model ID.
    #[arg(long, env = "VLM_MODEL_NAME", default_value = "qwen3vl-8b-instruct-fp8")]
    model: String,

    /// edgequake-llm provider (openai, anthropic, gemini, ollama, azure).
    #[arg(long, env = "DOC2JSON_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "DOC2JSON_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum tile edge in pixels.
    #[arg(long, env = "DOC2JSON_MAX_TILE_SIZE", default_value_t = 4096)]
    max_tile_size: u32,

    /// Overlap between consecutive tiles in pixels.
    #[arg(long, env = "DOC2JSON_TILE_OVERLAP", default_value_t = 120)]
    tile_overlap: u32,

    /// Number of OCR calls in flight; output order is unaffected.
    #[arg(short, long, env = "DOC2JSON_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Max output tokens per model call.
    #[arg(long, env = "DOC2JSON_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Skip the contrast stretch applied to rendered PDF pages.
    #[arg(long)]
    no_enhance: bool,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "DOC2JSON_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Retries per model call on 429/5xx/transport errors.
    #[arg(long, env = "DOC2JSON_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOC2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "DOC2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2JSON_QUIET")]
    quiet: bool,
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

    // ── Input ────────────────────────────────────────────────────────────
    let input = load_input(&cli.input, cli.download_timeout)
        .await
        .with_context(|| format!("Failed to load {}", cli.input))?;

    // ── Pipeline ─────────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let model = build_model(&cli)?;

    let mut pipeline = Pipeline::new(model, config);
    if cli.no_enhance {
        pipeline = pipeline.with_enhancer(Arc::new(NoEnhancement));
    }

    let filename = input.filename.as_deref();

    if cli.markdown_only {
        let markdown = pipeline
            .transcribe_document(&input.bytes, filename)
            .await;
        if let Some(cb) = &pipeline.config().progress_callback {
            cb.on_finished(markdown.is_ok());
        }
        let markdown = markdown.context("OCR failed")?;
        emit(&markdown, cli.output.as_deref()).await?;
        return Ok(());
    }

    let result = pipeline.process_document(&input.bytes, filename).await;
    let json = result
        .to_json(!cli.compact)
        .context("Failed to serialise result")?;
    emit(&json, cli.output.as_deref()).await?;

    if let PipelineResult::Failure { error } = &result {
        if !cli.quiet {
            eprintln!("{} {}", red("error:"), error);
        }
        std::process::exit(1);
    }

    if !cli.quiet {
        if let Some(report) = result.report() {
            let missing = report.missing_tables();
            if !missing.is_empty() {
                eprintln!("{} missing tables: {}", bold("⚠"), missing.join(", "));
            }
        }
        if let Some(path) = &cli.output {
            eprintln!("   → {}", bold(&path.display().to_string()));
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .max_tile_size(cli.max_tile_size)
        .tile_overlap(cli.tile_overlap)
        .concurrency(cli.concurrency);

    if let Some(n) = cli.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(path.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Pick the model backend: a named edgequake-llm provider, or the endpoint.
fn build_model(cli: &Cli) -> Result<Arc<dyn VisionLanguageModel>> {
    if let Some(ref name) = cli.provider {
        let provider = ProviderFactory::create_llm_provider(name, &cli.model)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Provider '{name}' is not configured"))?;
        return Ok(Arc::new(ProviderModel::new(provider)));
    }

    let model = OpenAiCompatibleModel::new(OpenAiCompatibleConfig {
        api_url: cli.api_url.clone(),
        api_key: cli.api_key.clone(),
        model: cli.model.clone(),
        timeout_secs: cli.api_timeout,
        max_retries: cli.max_retries,
        ..Default::default()
    })
    .context("Failed to build HTTP client")?;
    Ok(Arc::new(model))
}

/// Write to `path` atomically (temp file + rename), or to stdout.
async fn emit(text: &str, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        return Ok(());
    };

    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
            parent
        }
        None => Path::new("."),
    };

    // The temp file lives next to the target so `persist` is a same-filesystem
    // rename; it is deleted on drop if anything below fails.
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move result into {}", path.display()))?;
    Ok(())
}
