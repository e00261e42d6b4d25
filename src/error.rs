//! Error types for the edgequake-pdf2cards library.
//!
//! Three layers of failure exist, and each gets its own type:
//!
//! * [`Pdf2CardsError`]: **Fatal** for the current operation: the document
//!   cannot be split, the provider is not configured, a batch exhausted its
//!   retries, or the datastore refused a write. Returned as
//!   `Err(Pdf2CardsError)` from the pipeline entry points and mapped to an
//!   HTTP status by the server.
//!
//! * [`GenerationFailure`]: **Per attempt**: one model call for one batch
//!   went wrong. The retry orchestrator inspects its [`FailureClass`] to decide
//!   whether another attempt is worthwhile.
//!
//! * [`SchemaViolation`]: the model answered, but a card did not have the
//!   required shape. Wrapped into a `GenerationFailure` by the generation
//!   client.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2cards library.
#[derive(Debug, Error)]
pub enum Pdf2CardsError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// A request was rejected before any processing started.
    #[error("{0}")]
    InvalidInput(String),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF cannot be parsed or split into batches. Never retried.
    #[error("Failed to process the PDF file. It may be corrupted or in an unsupported format: {detail}")]
    CorruptDocument { detail: String },

    /// PDF requires a password; uploaded study documents must be unencrypted.
    #[error("PDF is encrypted and cannot be split into page batches")]
    PasswordProtected,

    // ── Generation errors ─────────────────────────────────────────────────
    /// Generic processing envelope: a batch exhausted its retries, or a
    /// service could not be initialised.
    #[error("{message}")]
    ProcessingError { status: u16, message: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A document or flashcard id did not match any row.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// The datastore rejected a query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations could not be applied.
    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The object store could not read, write or delete an object.
    #[error("Storage error on '{key}': {detail}")]
    Storage { key: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium system-wide, or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2CardsError {
    /// HTTP-style status code used when the error is reported to a caller.
    pub fn status(&self) -> u16 {
        match self {
            Pdf2CardsError::ProcessingError { status, .. } => *status,
            Pdf2CardsError::InvalidInput(_)
            | Pdf2CardsError::NotAPdf { .. }
            | Pdf2CardsError::PasswordProtected => 400,
            Pdf2CardsError::FileNotFound { .. } | Pdf2CardsError::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Build the envelope raised when a batch runs out of attempts.
    pub fn exhausted(attempts: u32, last: &GenerationFailure) -> Self {
        Pdf2CardsError::ProcessingError {
            status: 500,
            message: format!("{} (after {} attempts)", last, attempts),
        }
    }
}

/// Whether a failed generation attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureClass {
    /// Network blip, rate limit, timeout: a retry is likely to succeed.
    Transient,
    /// The model answered with unusable output. Retried only while
    /// [`crate::config::PipelineConfig::retry_malformed`] is set.
    Malformed,
    /// Bad credentials, rejected request: retrying cannot help.
    Permanent,
}

/// A single failed generation attempt for one batch.
#[derive(Debug, Clone, Error)]
pub enum GenerationFailure {
    /// The model service returned an error.
    #[error("Model call failed: {message}")]
    Model { message: String, class: FailureClass },

    /// The model call did not complete within `api_timeout_secs`.
    #[error("Model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The cleaned response was not valid JSON.
    #[error("Model response is not valid JSON: {detail}")]
    Parse { detail: String },

    /// The JSON did not match the flashcard schema.
    #[error("Model response failed validation: {0}")]
    Schema(#[from] SchemaViolation),
}

impl GenerationFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            GenerationFailure::Model { class, .. } => *class,
            GenerationFailure::Timeout { .. } => FailureClass::Transient,
            GenerationFailure::Parse { .. } | GenerationFailure::Schema(_) => {
                FailureClass::Malformed
            }
        }
    }
}

/// A generated card (or the envelope around it) had the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}' {constraint}")]
pub struct SchemaViolation {
    /// Path of the offending field, e.g. `flashcards[2].difficulty`.
    pub field: String,
    /// The constraint that failed, e.g. `must be between 1 and 100`.
    pub constraint: String,
}

impl SchemaViolation {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}
