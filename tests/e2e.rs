//! End-to-end tests for edgequake-pdf2cards.
//!
//! Two tiers:
//! - pdfium-backed tests build PDFs in memory and run the real splitter and
//!   upload service with a scripted model. They print `SKIP` when no pdfium
//!   library can be bound.
//! - live tests call a real provider. They are gated behind `E2E_ENABLED`
//!   and need a PDF in `./test_cases/`.
//!
//! Run with:
//!   PDFIUM_LIB_PATH=/path/to/libpdfium cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use edgequake_pdf2cards::db::{self, ProcessingState};
use edgequake_pdf2cards::pipeline::generate::{BinaryPart, ModelClient};
use edgequake_pdf2cards::pipeline::{pdfium, split};
use edgequake_pdf2cards::service::{DocumentService, ServiceSettings};
use edgequake_pdf2cards::storage::{LocalObjectStore, ObjectStore, UrlSigner};
use edgequake_pdf2cards::{
    generate_flashcards, pipeline_with_model, GenerationFailure, MemorySink, PipelineConfig,
};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

macro_rules! skip_unless_pdfium {
    () => {
        if !pdfium::is_available() {
            println!("SKIP — pdfium library not found; set PDFIUM_LIB_PATH");
            return;
        }
    };
}

/// A blank A4 document with `pages` pages.
fn blank_pdf(pages: usize) -> Vec<u8> {
    let pdfium = pdfium::bind().unwrap();
    let mut doc = pdfium.create_new_pdf().unwrap();
    for _ in 0..pages {
        doc.pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .unwrap();
    }
    doc.save_to_bytes().unwrap()
}

/// Always answers one card; fails on the batch covering page 6 for the
/// first `fail_times` calls that reach it.
struct OneCardModel {
    fail_times: u32,
    failures: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl ModelClient for OneCardModel {
    async fn generate(&self, prompt: &str, parts: &[BinaryPart]) -> Result<String, GenerationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(parts[0].data.starts_with(b"%PDF"));
        if prompt.contains("contains pages 6,")
            && self.failures.fetch_add(1, Ordering::SeqCst) < self.fail_times
        {
            return Err(GenerationFailure::Timeout { secs: 1 });
        }
        Ok(r#"{"flashcards":[{"term":"Osmosis","definition":"Diffusion of water",
            "difficulty":25,"source":"?","page":"?"}]}"#
            .into())
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig::builder()
        .pages_per_batch(5)
        .max_retries(3)
        .initial_retry_delay_ms(1)
        .build()
        .unwrap()
}

fn store_at(dir: &std::path::Path) -> Arc<dyn ObjectStore> {
    Arc::new(LocalObjectStore::new(
        dir.join("objects"),
        UrlSigner::new("e2e", "http://localhost:3000"),
    ))
}

async fn service_with(model: Arc<OneCardModel>, dir: &std::path::Path) -> DocumentService {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    DocumentService::new(
        pool,
        store_at(dir),
        pipeline_with_model(model, &fast_config()),
        ServiceSettings::default(),
    )
}

// ── pdfium-backed ────────────────────────────────────────────────────────────

#[tokio::test]
async fn split_twelve_pages_into_standalone_batches() {
    skip_unless_pdfium!();
    let bytes = blank_pdf(12);

    let batches = split::split_pdf(bytes, 5).await.unwrap();
    let ranges: Vec<_> = batches.iter().map(|b| b.pages.clone()).collect();
    assert_eq!(ranges, vec![0..5, 5..10, 10..12]);

    for batch in &batches {
        let n = split::page_count(batch.pdf_bytes.clone()).await.unwrap();
        assert_eq!(n, batch.page_count(), "batch {}", batch.index);
    }
}

#[tokio::test]
async fn corrupt_upload_fails_with_processing_message() {
    skip_unless_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(OneCardModel {
        fail_times: 0,
        failures: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let svc = service_with(Arc::clone(&model), dir.path()).await;

    let err = svc
        .upload_and_process("broken.pdf", "application/pdf", b"%PDF-1.7 truncated".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.status(), 500);
    assert!(err.to_string().contains("corrupted or in an unsupported format"));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);

    let docs = svc.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].processing_state, ProcessingState::Failed);
}

#[tokio::test]
async fn upload_retries_transient_failures_and_completes() {
    skip_unless_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(OneCardModel {
        fail_times: 2,
        failures: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let svc = service_with(Arc::clone(&model), dir.path()).await;

    let processed = svc
        .upload_and_process("Cell Bio.pdf", "application/pdf", blank_pdf(12))
        .await
        .unwrap();

    // 1 + (2 failures + 1 success) + 1
    assert_eq!(model.calls.load(Ordering::SeqCst), 5);
    assert_eq!(processed.output.stats.total_cards, 3);
    assert!(processed.file_url.contains("-Cell_Bio.pdf?expires="));
    assert_eq!(processed.document.processing_state, ProcessingState::Complete);
    assert_eq!(processed.document.metadata["originalName"], "Cell Bio.pdf");

    let cards = db::list_flashcards(svc.pool()).await.unwrap();
    let pages: Vec<&str> = cards.iter().map(|c| c.page.as_str()).collect();
    assert_eq!(pages, ["1", "6", "11"]);
    assert!(cards.iter().all(|c| c.source == "Cell Bio.pdf"));

    assert_eq!(svc.delete_document(processed.document.id).await.unwrap(), 3);
    assert!(db::list_flashcards(svc.pool()).await.unwrap().is_empty());
}

#[tokio::test]
async fn resume_picks_up_after_exhausted_batch() {
    skip_unless_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(OneCardModel {
        fail_times: 3,
        failures: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let svc = service_with(Arc::clone(&model), dir.path()).await;

    let err = svc
        .upload_and_process("notes.pdf", "application/pdf", blank_pdf(12))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("after 3 attempts"), "{err}");

    let doc = svc.list_documents().await.unwrap().remove(0);
    assert_eq!(doc.processing_state, ProcessingState::Failed);
    assert_eq!(doc.last_batch_index, Some(0));
    assert!(doc.last_error.is_some());

    let output = svc.resume(doc.id).await.unwrap();
    assert_eq!(output.stats.skipped_batches, 1);
    assert_eq!(output.stats.total_cards, 2);

    let doc = db::get_document(svc.pool(), doc.id).await.unwrap().unwrap();
    assert_eq!(doc.processing_state, ProcessingState::Complete);
    assert_eq!(db::list_flashcards(svc.pool()).await.unwrap().len(), 3);

    let again = svc.resume(doc.id).await.unwrap();
    assert_eq!(again.stats.total_batches, 0);
}

#[tokio::test]
async fn resume_keeps_the_original_batch_size() {
    skip_unless_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(OneCardModel {
        fail_times: 3,
        failures: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let svc = service_with(Arc::clone(&model), dir.path()).await;
    svc.upload_and_process("notes.pdf", "application/pdf", blank_pdf(12))
        .await
        .unwrap_err();
    let id = svc.list_documents().await.unwrap()[0].id;

    // Same data, restarted with ten-page batches.
    let wider = DocumentService::new(
        svc.pool().clone(),
        store_at(dir.path()),
        pipeline_with_model(Arc::clone(&model) as Arc<dyn ModelClient>, &fast_config()),
        ServiceSettings {
            pages_per_batch: 10,
            ..ServiceSettings::default()
        },
    );
    let output = wider.resume(id).await.unwrap();
    assert_eq!(output.stats.total_batches, 3);
    assert_eq!(output.stats.skipped_batches, 1);

    let doc = db::get_document(svc.pool(), id).await.unwrap().unwrap();
    assert_eq!(doc.processing_state, ProcessingState::Complete);
    assert_eq!(doc.pages_per_batch, Some(5));
    let cards = db::list_flashcards(svc.pool()).await.unwrap();
    let pages: Vec<&str> = cards.iter().map(|c| c.page.as_str()).collect();
    assert_eq!(pages, ["1", "6", "11"]);
}

#[tokio::test]
async fn failed_plan_write_marks_document_failed() {
    skip_unless_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(OneCardModel {
        fail_times: 0,
        failures: AtomicU32::new(0),
        calls: AtomicU32::new(0),
    });
    let svc = service_with(Arc::clone(&model), dir.path()).await;
    sqlx::query(
        "CREATE TRIGGER refuse_plan BEFORE UPDATE OF pages_per_batch ON documents \
         BEGIN SELECT RAISE(ABORT, 'plan write refused'); END",
    )
    .execute(svc.pool())
    .await
    .unwrap();

    let err = svc
        .upload_and_process("notes.pdf", "application/pdf", blank_pdf(6))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("plan write refused"), "{err}");
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);

    let doc = svc.list_documents().await.unwrap().remove(0);
    assert_eq!(doc.processing_state, ProcessingState::Failed);
    assert!(doc.last_error.unwrap().contains("plan write refused"));
}

// ── Live provider ────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

#[tokio::test]
async fn live_generation_produces_valid_cards() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run live tests");
        return;
    }
    let path = test_cases_dir().join("sample.pdf");
    if !path.exists() {
        println!("SKIP — test file not found: {}", path.display());
        return;
    }

    let config = PipelineConfig::builder().pages_per_batch(3).build().unwrap();
    let sink = MemorySink::new();
    let output = generate_flashcards(path.to_string_lossy(), &config, &sink)
        .await
        .unwrap();

    assert!(output.stats.total_cards > 0);
    for card in sink.cards() {
        assert!(!card.term.trim().is_empty());
        assert!(!card.definition.trim().is_empty());
        assert!((1..=100).contains(&card.difficulty));
        assert_eq!(card.source, "sample.pdf");
    }
}
