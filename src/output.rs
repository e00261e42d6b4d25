//! Result types returned by the pipeline entry points.

use crate::pipeline::schema::Flashcard;
use serde::{Deserialize, Serialize};

/// Everything produced by one run over a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Cards persisted during this run, in batch order.
    pub cards: Vec<Flashcard>,
    /// One entry per batch that was sent to the model in this run.
    pub batches: Vec<BatchOutcome>,
    pub stats: ProcessingStats,
}

/// How a single batch went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 0-based batch ordinal within the document.
    pub index: usize,
    /// Absolute 1-based page numbers.
    pub pages: Vec<usize>,
    pub cards: usize,
    /// Attempts used, first call included.
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_pages: usize,
    pub total_batches: usize,
    /// Batches sent to the model in this run.
    pub processed_batches: usize,
    /// Batches skipped because an earlier run already completed them.
    pub skipped_batches: usize,
    pub total_cards: usize,
    /// Model calls across all batches, retries included.
    pub total_attempts: u32,
    pub total_duration_ms: u64,
}
