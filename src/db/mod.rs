//! Datastore: SQLite tables for documents, flashcards, review progress and
//! learning paths.
//!
//! - `model`: typed rows returned by the repository.
//! - `repo`: SQL-only functions that map rows into models.
//! - `sink`: the pipeline's [`crate::pipeline::batch::CardSink`] over the repo.
//!
//! Import from `edgequake_pdf2cards::db`; the repository API is re-exported.

pub mod model;
pub mod repo;
pub mod sink;

pub use model::{
    CardProgress, Document, FlashcardUpdate, LearningPath, NewDocument, NewLearningPath,
    ProcessingState, ReviewStatus, StoredFlashcard,
};
pub use repo::*;
pub use sink::DocumentSink;
