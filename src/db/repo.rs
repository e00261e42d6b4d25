use super::model::{
    CardProgress, Document, FlashcardUpdate, LearningPath, NewDocument, NewLearningPath,
    ProcessingState, ReviewStatus, StoredFlashcard,
};
use crate::error::Pdf2CardsError;
use crate::pipeline::schema::{CardMetadata, Flashcard, MAX_DIFFICULTY, MIN_DIFFICULTY};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;
type Result<T> = std::result::Result<T, Pdf2CardsError>;

const DOCUMENT_COLUMNS: &str = "id, filename, object_key, url, mime_type, size, metadata, \
     created_at, processing_state, last_batch_index, total_batches, pages_per_batch, last_error";
const PATH_COLUMNS: &str =
    "id, title, description, difficulty, ord, flashcard_ids, prerequisites, created_at";
const FLASHCARD_COLUMNS: &str = "id, document_id, term, definition, hint, explanation, \
     key_concept, source, page, difficulty, idx, language, metadata, created_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to an in-memory database would otherwise see its own copy.
    let max_connections = if in_memory { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    if !in_memory {
        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    }
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ── Documents ────────────────────────────────────────────────────────────

#[instrument(skip_all, fields(filename = %doc.filename))]
pub async fn insert_document(pool: &Pool, doc: &NewDocument) -> Result<Document> {
    let sql = format!(
        "INSERT INTO documents (filename, object_key, url, mime_type, size, metadata, created_at, processing_state) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {DOCUMENT_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(&doc.filename)
        .bind(&doc.object_key)
        .bind(&doc.url)
        .bind(&doc.mime_type)
        .bind(doc.size)
        .bind(doc.metadata.to_string())
        .bind(Utc::now())
        .bind(ProcessingState::Pending.as_str())
        .fetch_one(pool)
        .await?;
    document_from_row(&row)
}

#[instrument(skip_all)]
pub async fn get_document(pool: &Pool, id: i64) -> Result<Option<Document>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(document_from_row).transpose()
}

/// All documents, newest first.
#[instrument(skip_all)]
pub async fn list_documents(pool: &Pool) -> Result<Vec<Document>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at DESC, id DESC");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(document_from_row).collect()
}

/// Persist a new processing state. `Failed` keeps the last completed batch
/// index so a later resume knows where to start.
#[instrument(skip_all)]
pub async fn set_processing_state(
    pool: &Pool,
    id: i64,
    state: ProcessingState,
    last_error: Option<&str>,
) -> Result<()> {
    let last_batch_index = state.last_batch_index().map(|i| i as i64);
    let done = sqlx::query(
        "UPDATE documents SET processing_state = ?, \
         last_batch_index = COALESCE(?, last_batch_index), last_error = ? WHERE id = ?",
    )
    .bind(state.as_str())
    .bind(last_batch_index)
    .bind(last_error)
    .bind(id)
    .execute(pool)
    .await?;
    if done.rows_affected() == 0 {
        return Err(Pdf2CardsError::NotFound { kind: "Document", id });
    }
    Ok(())
}

/// Advance the state after batch `batch_index` has all its cards stored.
#[instrument(skip_all)]
pub async fn record_batch_complete(
    pool: &Pool,
    id: i64,
    batch_index: usize,
    total_batches: usize,
) -> Result<()> {
    let state = if batch_index + 1 >= total_batches {
        ProcessingState::Complete
    } else {
        ProcessingState::PartiallyComplete {
            last_batch_index: batch_index,
        }
    };
    sqlx::query(
        "UPDATE documents SET processing_state = ?, last_batch_index = ?, \
         total_batches = ?, last_error = NULL WHERE id = ?",
    )
    .bind(state.as_str())
    .bind(batch_index as i64)
    .bind(total_batches as i64)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record how the document was split before its first batch runs.
#[instrument(skip_all)]
pub async fn set_batch_plan(
    pool: &Pool,
    id: i64,
    total_batches: usize,
    pages_per_batch: usize,
) -> Result<()> {
    let done = sqlx::query("UPDATE documents SET total_batches = ?, pages_per_batch = ? WHERE id = ?")
        .bind(total_batches as i64)
        .bind(pages_per_batch as i64)
        .bind(id)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(Pdf2CardsError::NotFound { kind: "Document", id });
    }
    Ok(())
}

/// Delete a document and every flashcard it owns, then close the gaps in
/// the display order. Returns the number of flashcards removed.
///
/// Cards without an owner whose `source` equals the document's filename
/// count as owned.
#[instrument(skip_all)]
pub async fn delete_document(pool: &Pool, id: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let filename: Option<String> = sqlx::query_scalar("SELECT filename FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(filename) = filename else {
        return Err(Pdf2CardsError::NotFound { kind: "Document", id });
    };

    let removed = sqlx::query(
        "DELETE FROM flashcards WHERE document_id = ? OR (document_id IS NULL AND source = ?)",
    )
    .bind(id)
    .bind(&filename)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if removed > 0 {
        densify_indices(&mut tx).await?;
    }
    tx.commit().await?;
    debug!("Deleted document {} and {} flashcards", id, removed);
    Ok(removed)
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let state: String = row.get("processing_state");
    let last_batch_index: Option<i64> = row.get("last_batch_index");
    let processing_state = ProcessingState::from_columns(&state, last_batch_index).ok_or_else(
        || Pdf2CardsError::Internal(format!("unknown processing state '{}'", state)),
    )?;
    let metadata: String = row.get("metadata");

    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        object_key: row.get("object_key"),
        url: row.get("url"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        processing_state,
        last_batch_index,
        total_batches: row.get("total_batches"),
        pages_per_batch: row.get("pages_per_batch"),
        last_error: row.get("last_error"),
    })
}

// ── Flashcards ───────────────────────────────────────────────────────────

/// Insert a generated card at the end of the display order.
#[instrument(skip_all)]
pub async fn insert_flashcard(
    pool: &Pool,
    document_id: Option<i64>,
    card: &Flashcard,
) -> Result<i64> {
    let metadata = card
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Pdf2CardsError::Internal(e.to_string()))?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO flashcards (document_id, term, definition, hint, explanation, key_concept, \
         source, page, difficulty, idx, language, metadata, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, \
         (SELECT COALESCE(MAX(idx), -1) + 1 FROM flashcards), ?, ?, ?) RETURNING id",
    )
    .bind(document_id)
    .bind(&card.term)
    .bind(&card.definition)
    .bind(&card.hint)
    .bind(&card.explanation)
    .bind(&card.key_concept)
    .bind(&card.source)
    .bind(&card.page)
    .bind(card.difficulty)
    .bind(&card.language)
    .bind(metadata)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Every card, in display order.
#[instrument(skip_all)]
pub async fn list_flashcards(pool: &Pool) -> Result<Vec<StoredFlashcard>> {
    let sql = format!("SELECT {FLASHCARD_COLUMNS} FROM flashcards ORDER BY idx, id");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(flashcard_from_row).collect()
}

#[instrument(skip_all)]
pub async fn list_flashcards_for_document(
    pool: &Pool,
    document_id: i64,
) -> Result<Vec<StoredFlashcard>> {
    let sql =
        format!("SELECT {FLASHCARD_COLUMNS} FROM flashcards WHERE document_id = ? ORDER BY idx, id");
    let rows = sqlx::query(&sql).bind(document_id).fetch_all(pool).await?;
    rows.iter().map(flashcard_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_flashcard(pool: &Pool, id: i64) -> Result<Option<StoredFlashcard>> {
    let sql = format!("SELECT {FLASHCARD_COLUMNS} FROM flashcards WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(flashcard_from_row).transpose()
}

/// Apply a partial update and return the updated card.
#[instrument(skip_all)]
pub async fn update_flashcard(
    pool: &Pool,
    id: i64,
    update: &FlashcardUpdate,
) -> Result<StoredFlashcard> {
    let mut card = get_flashcard(pool, id)
        .await?
        .ok_or(Pdf2CardsError::NotFound { kind: "Flashcard", id })?;

    if let Some(ref v) = update.term {
        card.term = non_empty("term", v)?;
    }
    if let Some(ref v) = update.definition {
        card.definition = non_empty("definition", v)?;
    }
    if let Some(ref v) = update.page {
        card.page = non_empty("page", v)?;
    }
    if let Some(v) = update.difficulty {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&v) {
            return Err(Pdf2CardsError::InvalidInput(format!(
                "difficulty must be between {MIN_DIFFICULTY} and {MAX_DIFFICULTY}"
            )));
        }
        card.difficulty = v;
    }
    if update.hint.is_some() {
        card.hint = update.hint.clone();
    }
    if update.explanation.is_some() {
        card.explanation = update.explanation.clone();
    }
    if update.key_concept.is_some() {
        card.key_concept = update.key_concept.clone();
    }
    if update.language.is_some() {
        card.language = update.language.clone();
    }

    sqlx::query(
        "UPDATE flashcards SET term = ?, definition = ?, hint = ?, explanation = ?, \
         key_concept = ?, page = ?, difficulty = ?, language = ? WHERE id = ?",
    )
    .bind(&card.term)
    .bind(&card.definition)
    .bind(&card.hint)
    .bind(&card.explanation)
    .bind(&card.key_concept)
    .bind(&card.page)
    .bind(card.difficulty)
    .bind(&card.language)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(card)
}

/// Delete one card and close the gap in the display order.
#[instrument(skip_all)]
pub async fn delete_flashcard(pool: &Pool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    let removed = sqlx::query("DELETE FROM flashcards WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(Pdf2CardsError::NotFound { kind: "Flashcard", id });
    }
    densify_indices(&mut tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Set the display order to exactly `ids`, which must list every card once.
#[instrument(skip_all)]
pub async fn reorder_flashcards(pool: &Pool, ids: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut existing: Vec<i64> = sqlx::query_scalar("SELECT id FROM flashcards")
        .fetch_all(&mut *tx)
        .await?;
    let mut requested = ids.to_vec();
    existing.sort_unstable();
    requested.sort_unstable();
    if existing != requested {
        return Err(Pdf2CardsError::InvalidInput(
            "ids must list every flashcard exactly once".into(),
        ));
    }

    for (position, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE flashcards SET idx = ? WHERE id = ?")
            .bind(position as i64)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Renumber `idx` to `0..N-1`, keeping the current relative order.
async fn densify_indices(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM flashcards ORDER BY idx, id")
        .fetch_all(&mut **tx)
        .await?;
    for (position, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE flashcards SET idx = ? WHERE id = ? AND idx != ?")
            .bind(position as i64)
            .bind(id)
            .bind(position as i64)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn non_empty(field: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Pdf2CardsError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn flashcard_from_row(row: &SqliteRow) -> Result<StoredFlashcard> {
    let metadata: Option<String> = row.get("metadata");
    let metadata = metadata
        .as_deref()
        .map(serde_json::from_str::<CardMetadata>)
        .transpose()
        .map_err(|e| Pdf2CardsError::Internal(format!("corrupt card metadata: {}", e)))?;

    Ok(StoredFlashcard {
        id: row.get("id"),
        document_id: row.get("document_id"),
        term: row.get("term"),
        definition: row.get("definition"),
        hint: row.get("hint"),
        explanation: row.get("explanation"),
        key_concept: row.get("key_concept"),
        source: row.get("source"),
        page: row.get("page"),
        difficulty: row.get("difficulty"),
        index: row.get("idx"),
        language: row.get("language"),
        metadata,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

// ── Review progress ──────────────────────────────────────────────────────

#[instrument(skip_all)]
pub async fn get_progress(pool: &Pool, flashcard_id: i64) -> Result<Option<CardProgress>> {
    let row = sqlx::query(
        "SELECT flashcard_id, correct_attempts, total_attempts, last_reviewed, status \
         FROM card_progress WHERE flashcard_id = ?",
    )
    .bind(flashcard_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(progress_from_row).transpose()
}

/// Counters for every reviewed card.
#[instrument(skip_all)]
pub async fn list_progress(pool: &Pool) -> Result<Vec<CardProgress>> {
    let rows = sqlx::query(
        "SELECT flashcard_id, correct_attempts, total_attempts, last_reviewed, status \
         FROM card_progress ORDER BY flashcard_id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(progress_from_row).collect()
}

fn progress_from_row(row: &SqliteRow) -> Result<CardProgress> {
    let status: String = row.get("status");
    Ok(CardProgress {
        flashcard_id: row.get("flashcard_id"),
        correct_attempts: row.get("correct_attempts"),
        total_attempts: row.get("total_attempts"),
        last_reviewed: row.get("last_reviewed"),
        status: ReviewStatus::parse(&status).ok_or_else(|| {
            Pdf2CardsError::Internal(format!("unknown review status '{}'", status))
        })?,
    })
}

#[instrument(skip_all)]
pub async fn upsert_progress(pool: &Pool, progress: &CardProgress) -> Result<()> {
    sqlx::query(
        "INSERT INTO card_progress (flashcard_id, correct_attempts, total_attempts, last_reviewed, status) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(flashcard_id) DO UPDATE SET correct_attempts = excluded.correct_attempts, \
         total_attempts = excluded.total_attempts, last_reviewed = excluded.last_reviewed, \
         status = excluded.status",
    )
    .bind(progress.flashcard_id)
    .bind(progress.correct_attempts)
    .bind(progress.total_attempts)
    .bind(progress.last_reviewed)
    .bind(progress.status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

// ── Learning paths ───────────────────────────────────────────────────────

/// Insert a path after every existing one.
#[instrument(skip_all, fields(title = %path.title))]
pub async fn insert_learning_path(pool: &Pool, path: &NewLearningPath) -> Result<LearningPath> {
    let sql = format!(
        "INSERT INTO learning_paths (title, description, difficulty, ord, flashcard_ids, prerequisites, created_at) \
         VALUES (?, ?, ?, (SELECT COALESCE(MAX(ord), 0) + 1 FROM learning_paths), ?, ?, ?) \
         RETURNING {PATH_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(&path.title)
        .bind(&path.description)
        .bind(path.difficulty)
        .bind(id_list(&path.flashcard_ids)?)
        .bind(id_list(&path.prerequisites)?)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    learning_path_from_row(&row)
}

#[instrument(skip_all)]
pub async fn get_learning_path(pool: &Pool, id: i64) -> Result<Option<LearningPath>> {
    let sql = format!("SELECT {PATH_COLUMNS} FROM learning_paths WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(learning_path_from_row).transpose()
}

/// All paths in study order.
#[instrument(skip_all)]
pub async fn list_learning_paths(pool: &Pool) -> Result<Vec<LearningPath>> {
    let sql = format!("SELECT {PATH_COLUMNS} FROM learning_paths ORDER BY ord, id");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(learning_path_from_row).collect()
}

fn id_list(ids: &[i64]) -> Result<String> {
    serde_json::to_string(ids).map_err(|e| Pdf2CardsError::Internal(e.to_string()))
}

fn learning_path_from_row(row: &SqliteRow) -> Result<LearningPath> {
    let parse = |column: &str| -> Result<Vec<i64>> {
        let raw: String = row.get(column);
        serde_json::from_str(&raw)
            .map_err(|e| Pdf2CardsError::Internal(format!("corrupt {column}: {e}")))
    };
    Ok(LearningPath {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        difficulty: row.get("difficulty"),
        order: row.get("ord"),
        flashcard_ids: parse("flashcard_ids")?,
        prerequisites: parse("prerequisites")?,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}
