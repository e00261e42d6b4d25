//! CLI binary for edgequake-pdf2cards.
//!
//! A thin shim over the library crate: one-off generation to JSON, document
//! management against the local datastore, and the HTTP service.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2cards::db;
use edgequake_pdf2cards::pipeline::generate::PDF_MIME;
use edgequake_pdf2cards::pipeline::input;
use edgequake_pdf2cards::server::{self, AppState};
use edgequake_pdf2cards::service::{
    self, DocumentService, ServiceSettings, DEFAULT_MAX_UPLOAD_BYTES,
};
use edgequake_pdf2cards::storage::{generate_secret, LocalObjectStore, ObjectStore, UrlSigner};
use edgequake_pdf2cards::{
    build_pipeline, generate_flashcards, MemorySink, PipelineConfig, PipelineProgressCallback,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over batches plus a log line per batch.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Splitting PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
    }

    fn elapsed(&self, batch: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&batch)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn page_span(pages: &[usize]) -> String {
    match (pages.first(), pages.last()) {
        (Some(first), Some(last)) if first != last => format!("pages {first}-{last}"),
        (Some(first), _) => format!("page {first}"),
        _ => "no pages".to_string(),
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, total_batches: usize, total_pages: usize) {
        self.activate_bar(total_batches);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Generating flashcards from {total_pages} pages in {total_batches} batches…"
            ))
        ));
    }

    fn on_batch_start(&self, batch: usize, _total: usize, pages: &[usize]) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(batch, Instant::now());
        self.bar.set_message(page_span(pages));
    }

    fn on_batch_retry(&self, batch: usize, attempt: u32, error: &str) {
        let msg = if error.len() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}  attempt {} failed: {}",
            cyan("↻"),
            batch + 1,
            attempt,
            dim(&msg)
        ));
    }

    fn on_batch_complete(&self, batch: usize, total: usize, cards: usize) {
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            batch + 1,
            total,
            dim(&format!("{cards:>3} cards")),
            dim(&format!("{:.1}s", self.elapsed(batch))),
        ));
        self.bar.inc(1);
    }

    fn on_batch_failed(&self, batch: usize, total: usize, error: &str) {
        let elapsed = self.elapsed(batch);
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}  {}",
            red("✗"),
            batch + 1,
            total,
            red(error),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.finish_and_clear();
    }

    fn on_pipeline_complete(&self, total_batches: usize, total_cards: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} flashcards from {} batches",
            green("✔"),
            bold(&total_cards.to_string()),
            total_batches
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate flashcards to stdout as JSON
  pdf2cards generate lecture.pdf

  # Write to a file, German cards, 3 pages per request
  pdf2cards generate lecture.pdf -o cards.json --language de --pages-per-batch 3

  # From a URL with a specific model
  pdf2cards generate https://arxiv.org/pdf/1706.03762 --provider openai --model gpt-4.1

  # Store a document and its cards in the local datastore
  pdf2cards ingest lecture.pdf

  # Continue a document whose generation failed part-way
  pdf2cards resume 3

  # Run the HTTP service
  pdf2cards serve --bind 0.0.0.0:3000 --signing-secret "$SECRET"

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY            Google Gemini API key (default provider)
  GEMINI_MODEL_NAME         Override the Gemini model
  OPENAI_API_KEY            OpenAI API key
  ANTHROPIC_API_KEY         Anthropic API key
  EDGEQUAKE_LLM_PROVIDER    Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL           Override model ID
  DATABASE_URL              SQLite URL for documents and flashcards
  PDF2CARDS_SIGNING_SECRET  Secret for signed object URLs
  PDFIUM_LIB_PATH           Path to an existing libpdfium
"#;

/// Turn PDF study documents into flashcards with a generative model.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2cards",
    version,
    about = "Turn PDF study documents into AI-generated flashcards",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2CARDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2CARDS_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF2CARDS_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate flashcards for a file or URL and print them as JSON.
    Generate {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Write JSON to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full pipeline output (cards, batches, stats).
        #[arg(long)]
        full: bool,

        #[command(flatten)]
        gen: GenerationArgs,
    },

    /// Store a PDF and generate its flashcards into the datastore.
    Ingest {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        #[command(flatten)]
        gen: GenerationArgs,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Continue generation for a stored document after its last completed batch.
    ///
    /// The document is re-split with the batch size it was first processed
    /// with; `--pages-per-batch` is ignored for documents that already have one.
    Resume {
        id: i64,

        #[command(flatten)]
        gen: GenerationArgs,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// List stored documents, newest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Delete a stored document and its flashcards.
    Delete {
        id: i64,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Run the HTTP service.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "PDF2CARDS_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Largest accepted upload, in MiB.
        #[arg(long, env = "PDF2CARDS_MAX_UPLOAD_MB", default_value_t = 10)]
        max_upload_mb: usize,

        #[command(flatten)]
        gen: GenerationArgs,

        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct GenerationArgs {
    /// Model ID (e.g. gemini-2.0-flash, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Language the cards are written in.
    #[arg(long, env = "PDF2CARDS_LANGUAGE", default_value = "en")]
    language: String,

    /// Pages sent to the model per request.
    #[arg(long, env = "PDF2CARDS_PAGES_PER_BATCH", default_value_t = 5)]
    pages_per_batch: usize,

    /// Attempts per batch, first call included.
    #[arg(long, env = "PDF2CARDS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delay before the second attempt; doubles after each failure.
    #[arg(long, env = "PDF2CARDS_RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Give up on a batch as soon as the model returns malformed output.
    #[arg(long, env = "PDF2CARDS_NO_RETRY_MALFORMED")]
    no_retry_malformed: bool,

    /// Max output tokens per batch.
    #[arg(long, env = "PDF2CARDS_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF2CARDS_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Path to a text file replacing the built-in prompt preamble.
    #[arg(long, env = "PDF2CARDS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Per-request model timeout in seconds.
    #[arg(long, env = "PDF2CARDS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2CARDS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// SQLite database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:~/.local/share/pdf2cards/pdf2cards.db"
    )]
    database_url: String,

    /// Directory for uploaded PDFs.
    #[arg(long, env = "PDF2CARDS_STORAGE_DIR", default_value = "data/objects")]
    storage_dir: PathBuf,

    /// Base URL used in signed object links.
    #[arg(long, env = "PDF2CARDS_PUBLIC_URL", default_value = "http://localhost:3000")]
    public_url: String,

    /// Secret for signing object URLs.
    #[arg(long, env = "PDF2CARDS_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let generating = matches!(
        cli.command,
        Command::Generate { .. } | Command::Ingest { .. } | Command::Resume { .. }
    );
    let show_progress = !cli.quiet && !cli.no_progress && generating;
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    match cli.command {
        Command::Generate {
            input,
            output,
            full,
            gen,
        } => {
            let config = build_config(&gen, progress).await?;
            let sink = MemorySink::new();
            let result = generate_flashcards(&input, &config, &sink)
                .await
                .context("Flashcard generation failed")?;

            let json = if full {
                serde_json::to_string_pretty(&result)
            } else {
                serde_json::to_string_pretty(&sink.cards())
            }
            .context("Failed to serialise output")?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    if !cli.quiet {
                        eprintln!(
                            "{}  {} cards  {}ms  →  {}",
                            green("✔"),
                            result.stats.total_cards,
                            result.stats.total_duration_ms,
                            bold(&path.display().to_string())
                        );
                    }
                }
                None => println!("{json}"),
            }
        }

        Command::Ingest { input, gen, store } => {
            let config = build_config(&gen, progress).await?;
            let (service, _, _) = open_service(&store, &config, DEFAULT_MAX_UPLOAD_BYTES).await?;
            let resolved = input::resolve_input(&input, config.download_timeout_secs)
                .await
                .context("Failed to read input")?;
            let processed = service
                .upload_and_process(&resolved.filename, PDF_MIME, resolved.bytes)
                .await
                .context("Flashcard generation failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  document {}  {} cards  →  {}",
                    green("✔"),
                    bold(&processed.document.id.to_string()),
                    processed.output.stats.total_cards,
                    dim(&processed.file_url)
                );
            }
        }

        Command::Resume { id, gen, store } => {
            let config = build_config(&gen, progress).await?;
            let (service, _, _) = open_service(&store, &config, DEFAULT_MAX_UPLOAD_BYTES).await?;
            let output = service
                .resume(id)
                .await
                .with_context(|| format!("Resuming document {id} failed"))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} new cards, {} batches skipped",
                    green("✔"),
                    output.stats.total_cards,
                    output.stats.skipped_batches
                );
            }
        }

        Command::List { json, store } => {
            let pool = open_pool(&store.database_url).await?;
            let docs = db::list_documents(&pool)
                .await
                .context("Failed to list documents")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&docs).context("Failed to serialise output")?
                );
            } else {
                for d in &docs {
                    println!(
                        "{:>5}  {:<10}  {:>9} B  {}  {}",
                        d.id,
                        d.processing_state.as_str(),
                        d.size,
                        d.created_at.format("%Y-%m-%d %H:%M"),
                        d.filename
                    );
                }
                if docs.is_empty() && !cli.quiet {
                    eprintln!("{}", dim("No documents stored."));
                }
            }
        }

        Command::Delete { id, store } => {
            let pool = open_pool(&store.database_url).await?;
            let (object_store, _) = open_store(&store);
            let removed = service::delete_document(&pool, object_store.as_ref(), id)
                .await
                .with_context(|| format!("Deleting document {id} failed"))?;
            if !cli.quiet {
                eprintln!("{}  document {} and {} flashcards deleted", green("✔"), id, removed);
            }
        }

        Command::Serve {
            bind,
            max_upload_mb,
            gen,
            store,
        } => {
            let config = build_config(&gen, None).await?;
            let (service, object_store, signer) =
                open_service(&store, &config, max_upload_mb * 1024 * 1024).await?;
            let state = AppState::new(service, object_store, signer);
            server::serve(state, bind).await.context("Server failed")?;
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    gen: &GenerationArgs,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .pages_per_batch(gen.pages_per_batch)
        .max_retries(gen.max_retries)
        .initial_retry_delay_ms(gen.retry_delay_ms)
        .retry_malformed(!gen.no_retry_malformed)
        .language(gen.language.clone())
        .max_tokens(gen.max_tokens)
        .temperature(gen.temperature)
        .api_timeout_secs(gen.api_timeout)
        .download_timeout_secs(gen.download_timeout);

    if let Some(ref model) = gen.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = gen.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = gen.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn open_pool(database_url: &str) -> Result<db::Pool> {
    let pool = db::init_pool(database_url)
        .await
        .with_context(|| format!("Failed to open database {database_url}"))?;
    db::run_migrations(&pool)
        .await
        .context("Failed to apply migrations")?;
    Ok(pool)
}

fn open_store(store: &StoreArgs) -> (Arc<dyn ObjectStore>, UrlSigner) {
    let secret = store.signing_secret.clone().unwrap_or_else(|| {
        tracing::warn!(
            "PDF2CARDS_SIGNING_SECRET not set; signed URLs will not survive a restart"
        );
        generate_secret()
    });
    let signer = UrlSigner::new(secret, store.public_url.clone());
    let object_store: Arc<dyn ObjectStore> =
        Arc::new(LocalObjectStore::new(store.storage_dir.clone(), signer.clone()));
    (object_store, signer)
}

async fn open_service(
    store: &StoreArgs,
    config: &PipelineConfig,
    max_upload_bytes: usize,
) -> Result<(DocumentService, Arc<dyn ObjectStore>, UrlSigner)> {
    let pool = open_pool(&store.database_url).await?;
    let (object_store, signer) = open_store(store);
    let pipeline = build_pipeline(config)
        .await
        .context("Failed to configure the model provider")?;
    let settings = ServiceSettings {
        pages_per_batch: config.pages_per_batch,
        language: config.language.clone(),
        max_upload_bytes,
    };
    let service = DocumentService::new(pool, Arc::clone(&object_store), pipeline, settings);
    Ok((service, object_store, signer))
}
