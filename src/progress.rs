//! Progress-callback trait for per-batch pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a document. The CLI drives a
//! terminal progress bar from these; the server only logs.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2cards::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     cards: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, batch: usize, total: usize, cards: usize) {
//!         self.cards.fetch_add(cards, Ordering::SeqCst);
//!         eprintln!("batch {}/{}: {} cards", batch + 1, total, cards);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { cards: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(cb as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch pipeline as it processes a document.
///
/// All methods have default no-op implementations. Batches are processed
/// sequentially, so calls for one document never overlap, but one callback
/// may be shared by concurrent uploads and must be `Send + Sync`.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once, after splitting, before the first batch is sent.
    fn on_pipeline_start(&self, total_batches: usize, total_pages: usize) {
        let _ = (total_batches, total_pages);
    }

    /// Called before the first attempt for a batch (0-based `batch`).
    fn on_batch_start(&self, batch: usize, total_batches: usize, pages: &[usize]) {
        let _ = (batch, total_batches, pages);
    }

    /// Called when an attempt failed and another one is scheduled.
    fn on_batch_retry(&self, batch: usize, attempt: u32, error: &str) {
        let _ = (batch, attempt, error);
    }

    /// Called once every card of the batch has been persisted.
    fn on_batch_complete(&self, batch: usize, total_batches: usize, cards: usize) {
        let _ = (batch, total_batches, cards);
    }

    /// Called when a batch exhausted its attempts; the run stops after this.
    fn on_batch_failed(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called once when the run ends without a batch failure.
    fn on_pipeline_complete(&self, total_batches: usize, total_cards: usize) {
        let _ = (total_batches, total_cards);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
