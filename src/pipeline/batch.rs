//! Batch pipeline: drive every batch of one document through generation,
//! retry and persistence.
//!
//! Batches run strictly one after another. A batch's cards are persisted
//! before the next batch is requested, so when a batch exhausts its attempts
//! the run stops with the cards of all earlier batches already stored. The
//! sink is told about every completed batch, which is what makes
//! [`BatchPipeline::run`] resumable from a [`ResumePoint`].

use crate::error::Pdf2CardsError;
use crate::output::{BatchOutcome, PipelineOutput, ProcessingStats};
use crate::pipeline::generate::{GenerationClient, GenerationRequest};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use crate::pipeline::schema::Flashcard;
use crate::pipeline::split::{plan_batches, PageBatch};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

/// Where generated cards go.
#[async_trait]
pub trait CardSink: Send + Sync {
    /// Persist one card. An error aborts the run.
    async fn insert_card(&self, card: &Flashcard) -> Result<(), Pdf2CardsError>;

    /// Record that every card of `batch_index` has been persisted.
    async fn mark_batch_complete(
        &self,
        batch_index: usize,
        total_batches: usize,
    ) -> Result<(), Pdf2CardsError>;
}

/// Per-document inputs that do not change between batches.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub filename: String,
    pub language: String,
}

/// Progress of an earlier run over the same document.
///
/// Batch indices only mean something under the batch size they were
/// produced with, so both travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Highest batch index whose cards are all persisted.
    pub last_batch_index: usize,
    pub pages_per_batch: usize,
}

/// Sequential generate → retry → persist loop.
#[derive(Clone)]
pub struct BatchPipeline {
    generator: GenerationClient,
    policy: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl BatchPipeline {
    pub fn new(generator: GenerationClient, policy: RetryPolicy) -> Self {
        Self {
            generator,
            policy,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Process `batches` in order.
    ///
    /// With a `resume` point, batches with `index <= last_batch_index` are
    /// skipped (their pages still count toward absolute numbering).
    ///
    /// # Errors
    /// - [`Pdf2CardsError::InvalidInput`] when `batches` were not split with
    ///   the resume point's batch size; nothing is generated
    /// - [`Pdf2CardsError::ProcessingError`] from the first batch that
    ///   exhausts its attempts
    /// - sink errors as-is
    pub async fn run(
        &self,
        batches: &[PageBatch],
        ctx: &BatchContext,
        sink: &dyn CardSink,
        resume: Option<ResumePoint>,
    ) -> Result<PipelineOutput, Pdf2CardsError> {
        let run_start = Instant::now();
        let total_batches = batches.len();
        let total_pages: usize = batches.iter().map(PageBatch::page_count).sum();

        if let Some(point) = resume {
            let expected = plan_batches(total_pages, point.pages_per_batch);
            if !batches.iter().map(|b| &b.pages).eq(expected.iter()) {
                return Err(Pdf2CardsError::InvalidInput(format!(
                    "'{}' was split into {}-page batches; resume must use the same batch size",
                    ctx.filename, point.pages_per_batch
                )));
            }
        }

        info!(
            "Generating flashcards for '{}': {} pages in {} batches",
            ctx.filename, total_pages, total_batches
        );
        if let Some(ref cb) = self.progress {
            cb.on_pipeline_start(total_batches, total_pages);
        }

        let mut output = PipelineOutput {
            stats: ProcessingStats {
                total_pages,
                total_batches,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut next_page = 1;

        for batch in batches {
            let page_numbers: Vec<usize> = (next_page..next_page + batch.page_count()).collect();
            next_page += batch.page_count();

            if resume.is_some_and(|p| batch.index <= p.last_batch_index) {
                output.stats.skipped_batches += 1;
                continue;
            }

            let outcome = self
                .run_one(batch, &page_numbers, total_batches, ctx, sink, &mut output)
                .await?;
            output.stats.processed_batches += 1;
            output.stats.total_attempts += outcome.attempts;
            output.batches.push(outcome);
        }

        output.stats.total_cards = output.cards.len();
        output.stats.total_duration_ms = run_start.elapsed().as_millis() as u64;
        info!(
            "'{}' complete: {} cards from {} batches ({} skipped), {}ms",
            ctx.filename,
            output.stats.total_cards,
            output.stats.processed_batches,
            output.stats.skipped_batches,
            output.stats.total_duration_ms
        );
        if let Some(ref cb) = self.progress {
            cb.on_pipeline_complete(total_batches, output.stats.total_cards);
        }
        Ok(output)
    }

    async fn run_one(
        &self,
        batch: &PageBatch,
        page_numbers: &[usize],
        total_batches: usize,
        ctx: &BatchContext,
        sink: &dyn CardSink,
        output: &mut PipelineOutput,
    ) -> Result<BatchOutcome, Pdf2CardsError> {
        let start = Instant::now();
        let label = format!(
            "Batch {}/{} (pages {}-{})",
            batch.index + 1,
            total_batches,
            page_numbers.first().copied().unwrap_or(0),
            page_numbers.last().copied().unwrap_or(0)
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(batch.index, total_batches, page_numbers);
        }

        let request = GenerationRequest {
            filename: ctx.filename.clone(),
            language: ctx.language.clone(),
            page_numbers: page_numbers.to_vec(),
        };

        let result = retry_with_backoff(
            &self.policy,
            &label,
            |_| self.generator.generate(batch, &request),
            |attempt, err| {
                if let Some(ref cb) = self.progress {
                    cb.on_batch_retry(batch.index, attempt, &err.to_string());
                }
            },
        )
        .await;

        let retried = match result {
            Ok(r) => r,
            Err(exhausted) => {
                let err = Pdf2CardsError::from(exhausted);
                warn!("{} failed: {}", label, err);
                if let Some(ref cb) = self.progress {
                    cb.on_batch_failed(batch.index, total_batches, &err.to_string());
                }
                return Err(err);
            }
        };

        let cards = retried.value;
        for card in &cards {
            sink.insert_card(card).await?;
        }
        sink.mark_batch_complete(batch.index, total_batches).await?;

        info!(
            "{}: {} cards after {} attempt(s)",
            label,
            cards.len(),
            retried.attempts
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(batch.index, total_batches, cards.len());
        }

        let outcome = BatchOutcome {
            index: batch.index,
            pages: page_numbers.to_vec(),
            cards: cards.len(),
            attempts: retried.attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        output.cards.extend(cards);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationFailure;
    use crate::pipeline::generate::{BinaryPart, ModelClient};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns one card per batch, or garbage for a batch starting at one of
    /// `broken_pages`.
    struct PerPageModel {
        calls: AtomicU32,
        broken_pages: Vec<usize>,
    }

    #[async_trait]
    impl ModelClient for PerPageModel {
        async fn generate(&self, prompt: &str, _: &[BinaryPart]) -> Result<String, GenerationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .broken_pages
                .iter()
                .any(|p| prompt.contains(&format!("contains pages {p}")))
            {
                return Ok("not json at all".into());
            }
            Ok(r#"{"flashcards": [
                {"term": "T", "definition": "D", "difficulty": 10, "source": "s", "page": "1"}
            ]}"#
            .into())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        cards: Mutex<Vec<Flashcard>>,
        completed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CardSink for RecordingSink {
        async fn insert_card(&self, card: &Flashcard) -> Result<(), Pdf2CardsError> {
            self.cards.lock().unwrap().push(card.clone());
            Ok(())
        }

        async fn mark_batch_complete(&self, batch_index: usize, _: usize) -> Result<(), Pdf2CardsError> {
            self.completed.lock().unwrap().push(batch_index);
            Ok(())
        }
    }

    fn batches(pages: usize, k: usize) -> Vec<PageBatch> {
        plan_batches(pages, k)
            .into_iter()
            .enumerate()
            .map(|(index, pages)| PageBatch {
                index,
                pages,
                pdf_bytes: b"%PDF".to_vec(),
            })
            .collect()
    }

    fn ctx() -> BatchContext {
        BatchContext {
            filename: "notes.pdf".into(),
            language: "en".into(),
        }
    }

    fn pipeline(model: Arc<PerPageModel>) -> BatchPipeline {
        BatchPipeline::new(
            GenerationClient::new(model),
            RetryPolicy {
                max_retries: 3,
                initial_delay_ms: 0,
                retry_malformed: true,
            },
        )
    }

    fn model(broken_pages: Vec<usize>) -> Arc<PerPageModel> {
        Arc::new(PerPageModel {
            calls: AtomicU32::new(0),
            broken_pages,
        })
    }

    #[tokio::test]
    async fn twelve_pages_give_three_batches_with_absolute_pages() {
        let sink = RecordingSink::default();
        let out = pipeline(model(vec![]))
            .run(&batches(12, 5), &ctx(), &sink, None)
            .await
            .unwrap();

        let pages: Vec<Vec<usize>> = out.batches.iter().map(|b| b.pages.clone()).collect();
        assert_eq!(
            pages,
            vec![(1..=5).collect::<Vec<_>>(), (6..=10).collect(), vec![11, 12]]
        );
        assert_eq!(out.stats.total_cards, 3);
        assert_eq!(*sink.completed.lock().unwrap(), vec![0, 1, 2]);

        let stored = sink.cards.lock().unwrap();
        let stored_pages: Vec<&str> = stored.iter().map(|c| c.page.as_str()).collect();
        assert_eq!(stored_pages, vec!["1", "6", "11"]);
        assert!(stored.iter().all(|c| c.source == "notes.pdf"));
    }

    #[tokio::test]
    async fn unparseable_batch_stops_run_after_max_attempts() {
        let m = model(vec![6]);
        let sink = RecordingSink::default();
        let err = pipeline(m.clone())
            .run(&batches(12, 5), &ctx(), &sink, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Pdf2CardsError::ProcessingError { status: 500, .. }));
        // one call for batch 1, three for batch 2, none for batch 3
        assert_eq!(m.calls.load(Ordering::SeqCst), 1 + 3);
        let stored = sink.cards.lock().unwrap();
        assert_eq!(stored.len(), 1, "only the first batch is persisted");
        assert_eq!(stored[0].page, "1");
        assert_eq!(*sink.completed.lock().unwrap(), vec![0]);
    }

    fn after(last_batch_index: usize, pages_per_batch: usize) -> Option<ResumePoint> {
        Some(ResumePoint {
            last_batch_index,
            pages_per_batch,
        })
    }

    #[tokio::test]
    async fn resume_skips_completed_batches() {
        let m = model(vec![]);
        let sink = RecordingSink::default();
        let out = pipeline(m.clone())
            .run(&batches(12, 5), &ctx(), &sink, after(0, 5))
            .await
            .unwrap();

        assert_eq!(m.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.stats.skipped_batches, 1);
        assert_eq!(out.stats.processed_batches, 2);
        assert_eq!(out.batches[0].pages[0], 6);
        assert_eq!(*sink.completed.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn resume_rejects_a_different_batch_size() {
        let m = model(vec![]);
        let sink = RecordingSink::default();

        for (k, point) in [(10, after(0, 5)), (20, after(0, 5)), (5, after(1, 3))] {
            let err = pipeline(m.clone())
                .run(&batches(12, k), &ctx(), &sink, point)
                .await
                .unwrap_err();
            assert_eq!(err.status(), 400, "k={k}");
        }
        assert_eq!(m.calls.load(Ordering::SeqCst), 0);
        assert!(sink.cards.lock().unwrap().is_empty());
        assert!(sink.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_document_is_a_no_op() {
        let m = model(vec![]);
        let sink = RecordingSink::default();
        let out = pipeline(m.clone()).run(&[], &ctx(), &sink, None).await.unwrap();
        assert_eq!(out.stats.total_batches, 0);
        assert_eq!(out.stats.total_cards, 0);
        assert_eq!(m.calls.load(Ordering::SeqCst), 0);
    }
}
