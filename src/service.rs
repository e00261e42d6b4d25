//! Document service: upload, generate, resume and delete.
//!
//! Ties the object store, the datastore and the batch pipeline together for
//! one uploaded document. Generation runs inline with the upload request;
//! when a batch fails the document keeps the cards of its completed batches
//! and can be resumed from the next one.

use crate::db::{self, DocumentSink, NewDocument, Pool, ProcessingState};
use crate::error::Pdf2CardsError;
use crate::output::PipelineOutput;
use crate::pipeline::batch::{BatchContext, BatchPipeline, ResumePoint};
use crate::pipeline::generate::PDF_MIME;
use crate::pipeline::split;
use crate::storage::{object_key, ObjectStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Largest accepted upload.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Per-service settings taken from the pipeline config and server flags.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub pages_per_batch: usize,
    pub language: String,
    pub max_upload_bytes: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            pages_per_batch: 5,
            language: "en".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedUpload {
    pub document: db::Document,
    pub file_url: String,
    pub output: PipelineOutput,
}

/// Upload and generation workflow over shared resources.
#[derive(Clone)]
pub struct DocumentService {
    pool: Pool,
    store: Arc<dyn ObjectStore>,
    pipeline: BatchPipeline,
    settings: ServiceSettings,
}

impl DocumentService {
    pub fn new(
        pool: Pool,
        store: Arc<dyn ObjectStore>,
        pipeline: BatchPipeline,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            pool,
            store,
            pipeline,
            settings,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Reject uploads that are empty, too large or not PDFs.
    pub fn validate_upload(&self, content_type: &str, size: usize) -> Result<(), Pdf2CardsError> {
        if size == 0 {
            return Err(Pdf2CardsError::InvalidInput("File is required".into()));
        }
        if size > self.settings.max_upload_bytes {
            return Err(Pdf2CardsError::InvalidInput("File size exceeds limit".into()));
        }
        if content_type != PDF_MIME {
            return Err(Pdf2CardsError::InvalidInput(format!(
                "Unsupported file type '{}'; only {} is accepted",
                content_type, PDF_MIME
            )));
        }
        Ok(())
    }

    /// Store the file, record it, then generate flashcards batch by batch.
    ///
    /// # Errors
    /// - [`Pdf2CardsError::InvalidInput`] (400) for validation failures
    /// - [`Pdf2CardsError::CorruptDocument`] (500) when pdfium cannot split
    ///   the upload, [`Pdf2CardsError::PasswordProtected`] (400) when it is
    ///   encrypted
    /// - [`Pdf2CardsError::ProcessingError`] (500) when storing fails or a
    ///   batch exhausts its attempts
    ///
    /// Once the document row exists, every failure is also recorded on it as
    /// [`ProcessingState::Failed`].
    pub async fn upload_and_process(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ProcessedUpload, Pdf2CardsError> {
        self.validate_upload(content_type, bytes.len())?;
        info!("Processing upload '{}' ({} bytes)", filename, bytes.len());

        let now = Utc::now();
        let key = object_key(filename, now.timestamp_millis());
        let file_url = self
            .store
            .put(&key, &bytes, content_type)
            .await
            .map_err(|e| {
                error!("Upload of '{}' failed: {}", key, e);
                Pdf2CardsError::ProcessingError {
                    status: 500,
                    message: "Failed to upload file".into(),
                }
            })?;

        let document = db::insert_document(
            &self.pool,
            &NewDocument {
                filename: filename.to_string(),
                object_key: key,
                url: file_url.clone(),
                mime_type: content_type.to_string(),
                size: bytes.len() as i64,
                metadata: serde_json::json!({
                    "originalName": filename,
                    "uploadedAt": now.to_rfc3339(),
                }),
            },
        )
        .await?;

        let output = self.generate(&document, bytes, None).await?;
        let document = db::get_document(&self.pool, document.id)
            .await?
            .unwrap_or(document);

        Ok(ProcessedUpload {
            document,
            file_url,
            output,
        })
    }

    /// Continue generation after the last completed batch.
    ///
    /// The document is split again with the batch size it was first split
    /// with, whatever the service is configured with now.
    pub async fn resume(&self, document_id: i64) -> Result<PipelineOutput, Pdf2CardsError> {
        let document = db::get_document(&self.pool, document_id)
            .await?
            .ok_or(Pdf2CardsError::NotFound {
                kind: "Document",
                id: document_id,
            })?;

        if document.processing_state == ProcessingState::Complete {
            info!("Document {} already complete; nothing to resume", document_id);
            return Ok(PipelineOutput::default());
        }
        if document.resume_after().is_some() && document.batch_size().is_none() {
            return Err(Pdf2CardsError::InvalidInput(format!(
                "Document {} has completed batches but no recorded batch size",
                document_id
            )));
        }

        let bytes = self.store.get(&document.object_key).await?;
        let resume = document.resume_point();
        info!("Resuming '{}' from {:?}", document.filename, resume);
        self.generate(&document, bytes, resume).await
    }

    async fn generate(
        &self,
        document: &db::Document,
        bytes: Vec<u8>,
        resume: Option<ResumePoint>,
    ) -> Result<PipelineOutput, Pdf2CardsError> {
        match self.run_generation(document, bytes, resume).await {
            Ok(output) => Ok(output),
            Err(e) => {
                error!("Generation for '{}' failed: {}", document.filename, e);
                self.mark_failed(document.id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_generation(
        &self,
        document: &db::Document,
        bytes: Vec<u8>,
        resume: Option<ResumePoint>,
    ) -> Result<PipelineOutput, Pdf2CardsError> {
        let pages_per_batch = document
            .batch_size()
            .unwrap_or(self.settings.pages_per_batch);
        if pages_per_batch != self.settings.pages_per_batch {
            info!(
                "'{}' keeps its {}-page batches (configured: {})",
                document.filename, pages_per_batch, self.settings.pages_per_batch
            );
        }

        let batches = split::split_pdf(bytes, pages_per_batch).await?;
        db::set_batch_plan(&self.pool, document.id, batches.len(), pages_per_batch).await?;

        let sink = DocumentSink::new(self.pool.clone(), document.id);
        let ctx = BatchContext {
            filename: document.filename.clone(),
            language: self.settings.language.clone(),
        };

        let output = self.pipeline.run(&batches, &ctx, &sink, resume).await?;
        db::set_processing_state(&self.pool, document.id, ProcessingState::Complete, None).await?;
        Ok(output)
    }

    async fn mark_failed(&self, document_id: i64, err: &Pdf2CardsError) {
        let message = err.to_string();
        if let Err(e) = db::set_processing_state(
            &self.pool,
            document_id,
            ProcessingState::Failed,
            Some(&message),
        )
        .await
        {
            warn!("Could not record failure for document {}: {}", document_id, e);
        }
    }

    /// Delete a document, its stored object and all of its flashcards.
    pub async fn delete_document(&self, document_id: i64) -> Result<u64, Pdf2CardsError> {
        delete_document(&self.pool, self.store.as_ref(), document_id).await
    }

    pub async fn list_documents(&self) -> Result<Vec<db::Document>, Pdf2CardsError> {
        db::list_documents(&self.pool).await
    }
}

/// Delete a document, its stored object and all of its flashcards.
///
/// Returns the number of flashcards removed. A storage failure is logged and
/// does not stop the database cleanup.
pub async fn delete_document(
    pool: &Pool,
    store: &dyn ObjectStore,
    document_id: i64,
) -> Result<u64, Pdf2CardsError> {
    let document = db::get_document(pool, document_id)
        .await?
        .ok_or(Pdf2CardsError::NotFound {
            kind: "Document",
            id: document_id,
        })?;

    if let Err(e) = store.delete(&document.object_key).await {
        warn!("Deleting object '{}' failed: {}", document.object_key, e);
    }

    let removed = db::delete_document(pool, document_id).await?;
    info!(
        "Deleted '{}' (id {}) and {} flashcards",
        document.filename, document_id, removed
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationFailure;
    use crate::pipeline::generate::{BinaryPart, GenerationClient, ModelClient};
    use crate::pipeline::retry::RetryPolicy;
    use crate::storage::{LocalObjectStore, UrlSigner};
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl ModelClient for NeverCalled {
        async fn generate(&self, _: &str, _: &[BinaryPart]) -> Result<String, GenerationFailure> {
            panic!("model must not be called");
        }
    }

    async fn service(dir: &std::path::Path) -> DocumentService {
        service_with(dir, ServiceSettings::default()).await
    }

    async fn service_with(dir: &std::path::Path, settings: ServiceSettings) -> DocumentService {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = Arc::new(LocalObjectStore::new(
            dir.join("objects"),
            UrlSigner::new("secret", "http://localhost"),
        ));
        let pipeline = BatchPipeline::new(
            GenerationClient::new(Arc::new(NeverCalled)),
            RetryPolicy::default(),
        );
        DocumentService::new(pool, store, pipeline, settings)
    }

    fn new_document(name: &str) -> NewDocument {
        NewDocument {
            filename: name.into(),
            object_key: format!("1-{name}"),
            url: format!("http://localhost/objects/1-{name}"),
            mime_type: PDF_MIME.into(),
            size: 10,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn validation_rejects_bad_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;

        let cases = [
            ("application/pdf", 0, "File is required"),
            ("application/pdf", DEFAULT_MAX_UPLOAD_BYTES + 1, "File size exceeds limit"),
            ("text/plain", 10, "Unsupported file type"),
        ];
        for (ct, size, msg) in cases {
            let err = svc.validate_upload(ct, size).unwrap_err();
            assert_eq!(err.status(), 400);
            assert!(err.to_string().contains(msg), "{err}");
        }
        assert!(svc.validate_upload("application/pdf", DEFAULT_MAX_UPLOAD_BYTES).is_ok());
    }

    #[tokio::test]
    async fn wrong_type_is_rejected_before_storing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        let err = svc
            .upload_and_process("notes.txt", "text/plain", b"hello".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(svc.list_documents().await.unwrap().is_empty());
        assert!(!dir.path().join("objects").exists());
    }

    #[tokio::test]
    async fn delete_survives_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        let doc = db::insert_document(svc.pool(), &new_document("gone.pdf"))
            .await
            .unwrap();

        assert_eq!(svc.delete_document(doc.id).await.unwrap(), 0);
        assert!(matches!(
            svc.delete_document(doc.id).await.unwrap_err(),
            Pdf2CardsError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn resume_unknown_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        assert_eq!(svc.resume(42).await.unwrap_err().status(), 404);
    }

    #[tokio::test]
    async fn split_errors_keep_their_own_kind() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service_with(
            dir.path(),
            ServiceSettings {
                pages_per_batch: 0,
                ..ServiceSettings::default()
            },
        )
        .await;

        let err = svc
            .upload_and_process("notes.pdf", PDF_MIME, b"%PDF-1.7".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2CardsError::InvalidConfig(_)), "{err:?}");
        assert!(!err.to_string().contains("corrupted"));

        let doc = svc.list_documents().await.unwrap().remove(0);
        assert_eq!(doc.processing_state, ProcessingState::Failed);
        assert!(doc.last_error.unwrap().contains("pages_per_batch"));
        assert_eq!(doc.pages_per_batch, None);
    }

    #[tokio::test]
    async fn resume_without_recorded_batch_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        let doc = db::insert_document(svc.pool(), &new_document("old.pdf"))
            .await
            .unwrap();
        db::set_processing_state(
            svc.pool(),
            doc.id,
            ProcessingState::PartiallyComplete { last_batch_index: 0 },
            None,
        )
        .await
        .unwrap();

        let err = svc.resume(doc.id).await.unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("no recorded batch size"), "{err}");
    }
}
