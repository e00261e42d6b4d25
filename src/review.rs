//! Review bookkeeping: per-card counters and a coarse mastery status.
//!
//! A card counts as mastered once it has been reviewed at least
//! [`MASTERY_MIN_ATTEMPTS`] times with a success ratio of at least
//! [`MASTERY_RATIO`].

use crate::db::{self, Pool};
use crate::error::Pdf2CardsError;
use chrono::{DateTime, Utc};
use tracing::debug;

pub use crate::db::model::{CardProgress, ReviewStatus};

pub const MASTERY_RATIO: f64 = 0.9;
pub const MASTERY_MIN_ATTEMPTS: i64 = 5;

/// Status implied by the counters.
pub fn calculate_status(correct: i64, total: i64) -> ReviewStatus {
    if total <= 0 {
        return ReviewStatus::NotStarted;
    }
    let ratio = correct as f64 / total as f64;
    if ratio >= MASTERY_RATIO && total >= MASTERY_MIN_ATTEMPTS {
        ReviewStatus::Completed
    } else {
        ReviewStatus::InProgress
    }
}

/// Fold one answer into `progress`.
pub fn apply_review(progress: &CardProgress, correct: bool, at: DateTime<Utc>) -> CardProgress {
    let correct_attempts = progress.correct_attempts + i64::from(correct);
    let total_attempts = progress.total_attempts + 1;
    CardProgress {
        flashcard_id: progress.flashcard_id,
        correct_attempts,
        total_attempts,
        last_reviewed: Some(at),
        status: calculate_status(correct_attempts, total_attempts),
    }
}

/// Record an answer for `flashcard_id` and return the updated counters.
pub async fn record_review(
    pool: &Pool,
    flashcard_id: i64,
    correct: bool,
) -> Result<CardProgress, Pdf2CardsError> {
    if db::get_flashcard(pool, flashcard_id).await?.is_none() {
        return Err(Pdf2CardsError::NotFound {
            kind: "Flashcard",
            id: flashcard_id,
        });
    }

    let current = db::get_progress(pool, flashcard_id)
        .await?
        .unwrap_or_else(|| CardProgress::new(flashcard_id));
    let updated = apply_review(&current, correct, Utc::now());
    db::upsert_progress(pool, &updated).await?;

    debug!(
        "Card {} reviewed: {}/{} ({:?})",
        flashcard_id, updated.correct_attempts, updated.total_attempts, updated.status
    );
    Ok(updated)
}
