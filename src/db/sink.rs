use super::repo::{self, Pool};
use crate::error::Pdf2CardsError;
use crate::pipeline::batch::CardSink;
use crate::pipeline::schema::Flashcard;
use async_trait::async_trait;

/// Persists one document's cards and advances its processing state after
/// every batch.
pub struct DocumentSink {
    pool: Pool,
    document_id: i64,
}

impl DocumentSink {
    pub fn new(pool: Pool, document_id: i64) -> Self {
        Self { pool, document_id }
    }
}

#[async_trait]
impl CardSink for DocumentSink {
    async fn insert_card(&self, card: &Flashcard) -> Result<(), Pdf2CardsError> {
        repo::insert_flashcard(&self.pool, Some(self.document_id), card).await?;
        Ok(())
    }

    async fn mark_batch_complete(
        &self,
        batch_index: usize,
        total_batches: usize,
    ) -> Result<(), Pdf2CardsError> {
        repo::record_batch_complete(&self.pool, self.document_id, batch_index, total_batches)
            .await
    }
}
