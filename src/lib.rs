//! # edgequake-pdf2cards
//!
//! Turn PDF study documents into flashcards with a generative model.
//!
//! ## Why batches?
//!
//! A whole textbook chapter does not fit in one model response, and a single
//! page gives the model too little context to pick meaningful terms. The
//! document is therefore cut into standalone PDFs of a few pages each, sent
//! inline to the model one after another, and every batch's cards are
//! persisted before the next request. A failure part-way leaves a consistent
//! prefix of the document processed, and the run can be resumed from there.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Split     k-page sub-documents via pdfium (spawn_blocking)
//!  ├─ 3. Generate  prompt + inline PDF → model → cleaned, validated JSON
//!  ├─ 4. Retry     bounded exponential backoff per batch
//!  └─ 5. Persist   cards appended in order; processing state per batch
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2cards::{generate_flashcards, MemorySink, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ...
//!     let config = PipelineConfig::default();
//!     let sink = MemorySink::new();
//!     let output = generate_flashcards("lecture.pdf", &config, &sink).await?;
//!     for card in sink.cards() {
//!         println!("{}: {}", card.term, card.definition);
//!     }
//!     eprintln!("{} cards from {} batches",
//!         output.stats.total_cards,
//!         output.stats.total_batches);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2cards` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2cards = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod db;
pub mod error;
pub mod learning;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod review;
pub mod server;
pub mod service;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, DEFAULT_MODEL, DEFAULT_PROVIDER};
pub use error::{FailureClass, GenerationFailure, Pdf2CardsError, SchemaViolation};
pub use output::{BatchOutcome, PipelineOutput, ProcessingStats};
pub use pipeline::batch::CardSink;
pub use pipeline::schema::{CardMetadata, Flashcard};
pub use process::{
    build_pipeline, generate_flashcards, generate_from_bytes, pipeline_with_model,
    resolve_provider, MemorySink,
};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
