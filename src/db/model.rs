//! Rows returned by the repository functions.
//!
//! Keep these structs focused on stored data; upload, generation and review
//! rules live in [`crate::service`] and [`crate::review`].

use crate::pipeline::batch::ResumePoint;
use crate::pipeline::schema::CardMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far flashcard generation got for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingState {
    /// Stored, no batch completed yet.
    Pending,
    /// Batches `0..=last_batch_index` have all their cards persisted.
    PartiallyComplete { last_batch_index: usize },
    Complete,
    /// A batch exhausted its attempts; resumable from the last completed batch.
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::PartiallyComplete { .. } => "partial",
            ProcessingState::Complete => "complete",
            ProcessingState::Failed => "failed",
        }
    }

    /// Rebuild from the `processing_state` / `last_batch_index` columns.
    pub fn from_columns(state: &str, last_batch_index: Option<i64>) -> Option<Self> {
        match state {
            "pending" => Some(ProcessingState::Pending),
            "partial" => last_batch_index
                .and_then(|i| usize::try_from(i).ok())
                .map(|last_batch_index| ProcessingState::PartiallyComplete { last_batch_index }),
            "complete" => Some(ProcessingState::Complete),
            "failed" => Some(ProcessingState::Failed),
            _ => None,
        }
    }

    /// The batch index carried by this state, if any.
    pub fn last_batch_index(&self) -> Option<usize> {
        match self {
            ProcessingState::PartiallyComplete { last_batch_index } => Some(*last_batch_index),
            _ => None,
        }
    }
}

/// An uploaded PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub object_key: String,
    /// Signed URL handed out at upload time.
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processing_state: ProcessingState,
    /// Highest batch index whose cards are all persisted. Survives a failure.
    pub last_batch_index: Option<i64>,
    pub total_batches: Option<i64>,
    /// Batch size the document was split with; resume must reuse it.
    pub pages_per_batch: Option<i64>,
    pub last_error: Option<String>,
}

impl Document {
    /// Batch index a resumed run should skip up to, inclusive.
    pub fn resume_after(&self) -> Option<usize> {
        self.last_batch_index.and_then(|i| usize::try_from(i).ok())
    }

    /// Batch size recorded when generation started.
    pub fn batch_size(&self) -> Option<usize> {
        self.pages_per_batch
            .and_then(|k| usize::try_from(k).ok())
            .filter(|&k| k > 0)
    }

    /// Where a resumed run picks up: `None` until a batch has completed
    /// under a recorded batch size.
    pub fn resume_point(&self) -> Option<ResumePoint> {
        Some(ResumePoint {
            last_batch_index: self.resume_after()?,
            pages_per_batch: self.batch_size()?,
        })
    }
}

/// Fields supplied when a document is first stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub object_key: String,
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    pub metadata: serde_json::Value,
}

/// A persisted flashcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFlashcard {
    pub id: i64,
    pub document_id: Option<i64>,
    pub term: String,
    pub definition: String,
    pub hint: Option<String>,
    pub explanation: Option<String>,
    pub key_concept: Option<String>,
    pub source: String,
    pub page: String,
    pub difficulty: i64,
    /// Dense display position, `0..N-1` across all cards.
    pub index: i64,
    pub language: Option<String>,
    pub metadata: Option<CardMetadata>,
    pub created_at: DateTime<Utc>,
}

/// Partial update for a flashcard. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardUpdate {
    pub term: Option<String>,
    pub definition: Option<String>,
    pub hint: Option<String>,
    pub explanation: Option<String>,
    pub key_concept: Option<String>,
    pub page: Option<String>,
    pub difficulty: Option<i64>,
    pub language: Option<String>,
}

/// Review state of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::NotStarted => "not_started",
            ReviewStatus::InProgress => "in_progress",
            ReviewStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(ReviewStatus::NotStarted),
            "in_progress" => Some(ReviewStatus::InProgress),
            "completed" => Some(ReviewStatus::Completed),
            _ => None,
        }
    }
}

/// Per-card review counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProgress {
    pub flashcard_id: i64,
    pub correct_attempts: i64,
    pub total_attempts: i64,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub status: ReviewStatus,
}

impl CardProgress {
    pub fn new(flashcard_id: i64) -> Self {
        Self {
            flashcard_id,
            correct_attempts: 0,
            total_attempts: 0,
            last_reviewed: None,
            status: ReviewStatus::NotStarted,
        }
    }
}

/// An ordered group of cards to study, unlocked by finishing other paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub difficulty: i64,
    /// Position among all paths; new paths go last.
    pub order: i64,
    pub flashcard_ids: Vec<i64>,
    /// Paths that must be completed first.
    pub prerequisites: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when a learning path is created.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLearningPath {
    pub title: String,
    pub description: Option<String>,
    pub difficulty: i64,
    pub flashcard_ids: Vec<i64>,
    #[serde(default)]
    pub prerequisites: Vec<i64>,
}
