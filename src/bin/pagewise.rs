//! CLI binary for pagewise.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EngineConfig`, runs one document and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use pagewise::{
    CostCeiling, DocumentResult, Engine, EngineConfig, EnvCredentials, PageProvenance, PageStatus,
    ProgressCallback, ProgressObserver, ProviderHealth, ProviderSpec, StrategyMode, UsageRecord,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per resolved page. Pages arrive out
/// of order when concurrency > 1.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ProgressObserver for CliProgress {
    fn on_document_start(&self, _document_id: &str, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn on_page_resolved(&self, index: usize, total: usize, p: &PageProvenance) {
        let mark = if p.status == PageStatus::Failed {
            red("✗")
        } else if p.degraded {
            yellow("⚠")
        } else if p.provider.is_some() {
            cyan("◆")
        } else {
            green("✓")
        };
        let confidence = p
            .confidence
            .map(|c| format!("{c:.2}"))
            .unwrap_or_else(|| "-".into());
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            mark,
            index + 1,
            total,
            p.method.as_str(),
            dim(&format!("confidence {confidence}")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, _document_id: &str, _usage: &UsageRecord) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Deterministic extraction only (no API key needed)
  pagewise --strategy library-only report.pdf

  # Escalate weak pages to OpenAI, at most 5 AI pages
  pagewise --provider openai:gpt-4.1-nano:0.01 --ceiling 5 scan.pdf

  # Fallback chain: OpenAI first, then Gemini with a 30s timeout
  pagewise --provider openai:gpt-4.1-nano:0.01 --provider gemini:gemini-2.0-flash:0.005:30 doc.pdf

  # Every page through AI, JSON result with provenance
  pagewise --strategy ai-priority --provider anthropic:claude-haiku-4-20250514 --json doc.pdf

  # OCR as a second deterministic pass
  pagewise --ocr --language deu scanned.pdf -o scanned.txt

PROVIDER FORMAT:
  name:model[:rate_per_page[:timeout_secs]]
  Model tags are kept: ollama:llama3.2-vision:11b:0:120
  Providers are not initialised for --strategy library-only.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  MISTRAL_API_KEY         Mistral API key
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract PDFs page by page, paying for AI only where the text layer is weak.
#[derive(Parser, Debug)]
#[command(
    name = "pagewise",
    version,
    about = "Page-level PDF extraction: library first, AI vision only where it pays off",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "PAGEWISE_OUTPUT")]
    output: Option<PathBuf>,

    /// Strategy: library-only, auto, ai-priority.
    #[arg(long, env = "PAGEWISE_STRATEGY", default_value = "auto")]
    strategy: String,

    /// Maximum pages of this document sent to AI (unlimited if unset).
    #[arg(long, env = "PAGEWISE_CEILING")]
    ceiling: Option<u32>,

    /// AI provider, repeatable, in priority order: name:model[:rate[:timeout]].
    #[arg(long = "provider", env = "PAGEWISE_PROVIDERS", value_delimiter = ',')]
    providers: Vec<String>,

    /// Escalate pages scoring below this confidence (0.0–1.0).
    #[arg(long, env = "PAGEWISE_THRESHOLD", default_value_t = 0.6)]
    threshold: f32,

    /// Pages processed at the same time.
    #[arg(short, long, env = "PAGEWISE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Rendering DPI for OCR and vision (72–400).
    #[arg(long, env = "PAGEWISE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Run tesseract OCR on pages with a weak text layer.
    #[arg(long, env = "PAGEWISE_OCR")]
    ocr: bool,

    /// Language hint for OCR and vision (tesseract code).
    #[arg(long, env = "PAGEWISE_LANGUAGE", default_value = "eng")]
    language: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAGEWISE_PASSWORD")]
    password: Option<String>,

    /// Output the full JSON result (text, tables, images, provenance, usage).
    #[arg(long, env = "PAGEWISE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAGEWISE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEWISE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEWISE_QUIET")]
    quiet: bool,

    /// Default per-call provider timeout in seconds.
    #[arg(long, env = "PAGEWISE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn ProgressObserver>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;
    let mode: StrategyMode = cli.strategy.parse().context("Invalid --strategy")?;
    let ceiling = CostCeiling::from(cli.ceiling);

    let engine = Engine::for_mode(
        config,
        &EnvCredentials,
        Arc::new(ProviderHealth::default()),
        mode,
    )
    .context("Failed to initialise extraction adapters")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let id = cli.input.display().to_string();
    let mut doc = engine
        .load_document(id, bytes, mode, ceiling)
        .await
        .context("Failed to open PDF")?;
    let result = engine.process(&mut doc).await.context("Extraction failed")?;

    let rendered = if cli.json {
        result.to_json_pretty().context("Failed to serialise result")?
    } else {
        result.text.clone()
    };

    if let Some(ref path) = cli.output {
        tokio::fs::write(path, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        print_summary(&result, cli.output.as_ref());
    }
    Ok(())
}

/// Map CLI args to `EngineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<EngineConfig> {
    let providers = cli
        .providers
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.parse::<ProviderSpec>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --provider")?;

    let mut builder = EngineConfig::builder()
        .confidence_threshold(cli.threshold)
        .concurrency(cli.concurrency)
        .dpi(cli.dpi)
        .language(cli.language.clone())
        .enable_ocr(cli.ocr)
        .providers(providers)
        .provider_timeout_secs(cli.api_timeout);

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn print_summary(result: &DocumentResult, output: Option<&PathBuf>) {
    let usage = &result.usage;
    let degraded = result.degraded_pages().count();
    let mark = if degraded == 0 { green("✔") } else { yellow("⚠") };
    let target = output
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{mark} {} pages  ({} library, {} AI){target}",
        bold(&usage.pages_total.to_string()),
        usage.pages_library,
        usage.pages_ai,
    );
    eprintln!("   estimated cost {}", dim(&format!("{:.4}", usage.cost_estimate)));
    if degraded > 0 {
        let pages: Vec<String> = result
            .degraded_pages()
            .map(|p| (p.page + 1).to_string())
            .collect();
        eprintln!("   degraded pages: {}", yellow(&pages.join(", ")));
    }
}
