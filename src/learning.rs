//! Learning paths: ordered groups of flashcards unlocked by prerequisites.
//!
//! A path is completed once every card it lists that still exists has review
//! status [`ReviewStatus::Completed`]. A path whose cards were all deleted is
//! never completed. The next path to study is the first one in path order
//! that is not completed and whose prerequisites all are.

use crate::db::{self, Pool, ReviewStatus};
use crate::error::Pdf2CardsError;
use crate::pipeline::schema::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

pub use crate::db::model::{LearningPath, NewLearningPath};

/// A path together with how far its cards have been mastered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathProgress {
    #[serde(flatten)]
    pub path: LearningPath,
    pub completed_cards: usize,
    pub total_cards: usize,
    pub completed: bool,
    /// Every prerequisite is completed.
    pub unlocked: bool,
}

/// Evaluate `paths` against the set of existing and of mastered card ids.
pub fn evaluate_paths(
    paths: Vec<LearningPath>,
    existing: &HashSet<i64>,
    mastered: &HashSet<i64>,
) -> Vec<PathProgress> {
    let mut progress: Vec<PathProgress> = paths
        .into_iter()
        .map(|path| {
            let cards: Vec<i64> = path
                .flashcard_ids
                .iter()
                .copied()
                .filter(|id| existing.contains(id))
                .collect();
            let completed_cards = cards.iter().filter(|id| mastered.contains(id)).count();
            PathProgress {
                completed: !cards.is_empty() && completed_cards == cards.len(),
                total_cards: cards.len(),
                completed_cards,
                unlocked: false,
                path,
            }
        })
        .collect();

    let done: HashSet<i64> = progress
        .iter()
        .filter(|p| p.completed)
        .map(|p| p.path.id)
        .collect();
    for p in &mut progress {
        p.unlocked = p.path.prerequisites.iter().all(|id| done.contains(id));
    }
    progress
}

/// First path, in order, that is unlocked and not yet completed.
pub fn next_path(progress: &[PathProgress]) -> Option<&PathProgress> {
    progress.iter().find(|p| p.unlocked && !p.completed)
}

/// Validate and store a new path at the end of the order.
///
/// # Errors
/// - [`Pdf2CardsError::InvalidInput`] for an empty title or card list, or a
///   difficulty outside 1..=100
/// - [`Pdf2CardsError::NotFound`] when a card or prerequisite does not exist
pub async fn create_path(pool: &Pool, new: &NewLearningPath) -> Result<LearningPath, Pdf2CardsError> {
    if new.title.trim().is_empty() {
        return Err(Pdf2CardsError::InvalidInput("title must not be empty".into()));
    }
    if new.flashcard_ids.is_empty() {
        return Err(Pdf2CardsError::InvalidInput(
            "a learning path needs at least one flashcard".into(),
        ));
    }
    if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&new.difficulty) {
        return Err(Pdf2CardsError::InvalidInput(format!(
            "difficulty must be between {} and {}",
            MIN_DIFFICULTY, MAX_DIFFICULTY
        )));
    }

    for &id in &new.flashcard_ids {
        if db::get_flashcard(pool, id).await?.is_none() {
            return Err(Pdf2CardsError::NotFound { kind: "Flashcard", id });
        }
    }
    for &id in &new.prerequisites {
        if db::get_learning_path(pool, id).await?.is_none() {
            return Err(Pdf2CardsError::NotFound {
                kind: "Learning path",
                id,
            });
        }
    }

    let path = db::insert_learning_path(pool, new).await?;
    info!(
        "Created learning path '{}' (id {}) with {} cards",
        path.title,
        path.id,
        path.flashcard_ids.len()
    );
    Ok(path)
}

/// Every path with its completion, in order.
pub async fn list_progress(pool: &Pool) -> Result<Vec<PathProgress>, Pdf2CardsError> {
    let paths = db::list_learning_paths(pool).await?;
    let existing: HashSet<i64> = db::list_flashcards(pool)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let mastered: HashSet<i64> = db::list_progress(pool)
        .await?
        .into_iter()
        .filter(|p| p.status == ReviewStatus::Completed)
        .map(|p| p.flashcard_id)
        .collect();
    Ok(evaluate_paths(paths, &existing, &mastered))
}

/// The path to study next, if any remains.
pub async fn next_lesson(pool: &Pool) -> Result<Option<PathProgress>, Pdf2CardsError> {
    let progress = list_progress(pool).await?;
    Ok(next_path(&progress).cloned())
}
