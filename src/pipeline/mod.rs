//! Pipeline stages for PDF-to-flashcard generation.
//!
//! Each submodule implements one step and is testable on its own; only
//! [`generate`] talks to the network and only [`split`] touches pdfium.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ batch ─┬─▶ retry ──▶ generate ──▶ clean ──▶ schema
//! (bytes)   (pdfium)  (loop) │   (backoff)  (model)     (fences)  (validate)
//!                            └─▶ CardSink (persist per batch)
//! ```
//!
//! 1. [`input`]    read a local file or download a URL, check `%PDF`
//! 2. [`split`]    cut the document into standalone PDFs of k pages
//!    (`spawn_blocking`; pdfium is not async-safe)
//! 3. [`batch`]    walk the batches in order, persisting each before the next
//! 4. [`retry`]    bounded exponential backoff around one batch
//! 5. [`generate`] prompt + inline PDF → model text → cards
//! 6. [`clean`] / [`schema`] recover and validate the JSON

pub mod batch;
pub mod clean;
pub mod generate;
pub mod input;
pub mod pdfium;
pub mod retry;
pub mod schema;
pub mod split;
