//! Batch splitting: partition a PDF into fixed-size page groups.
//!
//! Every batch is re-encoded as an independent PDF (pages copied into a fresh
//! document and saved) rather than sent as a page range of the original, so
//! the model only ever sees the pages it is asked about.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; calling it on a Tokio
//! worker would stall the executor for the duration of the copy. The blocking
//! pool is the right home for it.

use crate::error::Pdf2CardsError;
use crate::pipeline::pdfium;
use pdfium_render::prelude::*;
use std::ops::Range;
use tracing::{debug, info};

/// A contiguous run of pages from one document, as a standalone PDF.
#[derive(Clone)]
pub struct PageBatch {
    /// 0-based position of this batch within the document.
    pub index: usize,
    /// 0-based page indices in the source document.
    pub pages: Range<usize>,
    /// The batch pages as an independently parseable PDF.
    pub pdf_bytes: Vec<u8>,
}

impl PageBatch {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl std::fmt::Debug for PageBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBatch")
            .field("index", &self.index)
            .field("pages", &self.pages)
            .field("pdf_bytes", &format_args!("<{} bytes>", self.pdf_bytes.len()))
            .finish()
    }
}

/// Partition `page_count` pages into 0-based ranges of at most `pages_per_batch`.
///
/// Covers every page exactly once, in order; only the last range may be short.
pub fn plan_batches(page_count: usize, pages_per_batch: usize) -> Vec<Range<usize>> {
    let k = pages_per_batch.max(1);
    (0..page_count)
        .step_by(k)
        .map(|start| start..(start + k).min(page_count))
        .collect()
}

/// Split PDF bytes into batches of `pages_per_batch` pages.
///
/// # Errors
/// - [`Pdf2CardsError::InvalidConfig`] when `pages_per_batch` is zero
/// - [`Pdf2CardsError::CorruptDocument`] when pdfium cannot parse or re-encode
/// - [`Pdf2CardsError::PasswordProtected`] for encrypted documents
pub async fn split_pdf(
    bytes: Vec<u8>,
    pages_per_batch: usize,
) -> Result<Vec<PageBatch>, Pdf2CardsError> {
    if pages_per_batch == 0 {
        return Err(Pdf2CardsError::InvalidConfig(
            "pages_per_batch must be ≥ 1".into(),
        ));
    }

    tokio::task::spawn_blocking(move || split_pdf_blocking(&bytes, pages_per_batch))
        .await
        .map_err(|e| Pdf2CardsError::Internal(format!("Split task panicked: {}", e)))?
}

/// Count the pages of a PDF without splitting it.
pub async fn page_count(bytes: Vec<u8>) -> Result<usize, Pdf2CardsError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = pdfium::bind()?;
        let document = load(&pdfium, &bytes)?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| Pdf2CardsError::Internal(format!("Page count task panicked: {}", e)))?
}

/// Blocking implementation of [`split_pdf`].
fn split_pdf_blocking(
    bytes: &[u8],
    pages_per_batch: usize,
) -> Result<Vec<PageBatch>, Pdf2CardsError> {
    let pdfium = pdfium::bind()?;
    let source = load(&pdfium, bytes)?;

    let total_pages = source.pages().len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let mut batches = Vec::new();
    for (index, range) in plan_batches(total_pages, pages_per_batch)
        .into_iter()
        .enumerate()
    {
        let mut batch_doc = pdfium.create_new_pdf().map_err(corrupt)?;
        let first = range.start as PdfPageIndex;
        let last = (range.end - 1) as PdfPageIndex;
        batch_doc
            .pages_mut()
            .copy_page_range_from_document(&source, first..=last, 0)
            .map_err(corrupt)?;
        let pdf_bytes = batch_doc.save_to_bytes().map_err(corrupt)?;

        debug!(
            "Batch {}: pages {}-{} → {} bytes",
            index + 1,
            range.start + 1,
            range.end,
            pdf_bytes.len()
        );

        batches.push(PageBatch {
            index,
            pages: range,
            pdf_bytes,
        });
    }

    Ok(batches)
}

fn load<'a>(pdfium: &'a Pdfium, bytes: &'a [u8]) -> Result<PdfDocument<'a>, Pdf2CardsError> {
    pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.contains("Password") || detail.contains("password") {
            Pdf2CardsError::PasswordProtected
        } else {
            Pdf2CardsError::CorruptDocument { detail }
        }
    })
}

fn corrupt(e: PdfiumError) -> Pdf2CardsError {
    Pdf2CardsError::CorruptDocument {
        detail: format!("{:?}", e),
    }
}
