//! Library entry points: from a PDF (path, URL or bytes) to flashcards.
//!
//! These functions wire the pipeline stages together without any datastore:
//! cards go to whatever [`CardSink`] the caller passes. The HTTP service in
//! [`crate::service`] uses the same pieces with a database-backed sink.

use crate::config::{PipelineConfig, DEFAULT_MODEL, DEFAULT_PROVIDER};
use crate::error::Pdf2CardsError;
use crate::output::PipelineOutput;
use crate::pipeline::batch::{BatchContext, BatchPipeline, CardSink};
use crate::pipeline::generate::{GenerationClient, LlmModelClient, ModelClient};
use crate::pipeline::schema::Flashcard;
use crate::pipeline::{input, split};
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Generate flashcards for a local file or HTTP(S) URL.
///
/// # Errors
/// Input errors (missing file, not a PDF, download failure), split errors
/// ([`Pdf2CardsError::CorruptDocument`]), provider resolution errors and the
/// first batch that exhausts its attempts.
pub async fn generate_flashcards(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
    sink: &dyn CardSink,
) -> Result<PipelineOutput, Pdf2CardsError> {
    let input_str = input_str.as_ref();
    info!("Starting flashcard generation: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    generate_from_bytes(resolved.bytes, &resolved.filename, config, sink).await
}

/// Generate flashcards from PDF bytes already in memory.
pub async fn generate_from_bytes(
    bytes: Vec<u8>,
    filename: &str,
    config: &PipelineConfig,
    sink: &dyn CardSink,
) -> Result<PipelineOutput, Pdf2CardsError> {
    let pipeline = build_pipeline(config).await?;
    let batches = split::split_pdf(bytes, config.pages_per_batch).await?;
    let ctx = BatchContext {
        filename: filename.to_string(),
        language: config.language.clone(),
    };
    pipeline.run(&batches, &ctx, sink, None).await
}

/// Build the batch pipeline for `config`, resolving the model provider.
pub async fn build_pipeline(config: &PipelineConfig) -> Result<BatchPipeline, Pdf2CardsError> {
    let provider = resolve_provider(config).await?;
    let model: Arc<dyn ModelClient> = Arc::new(LlmModelClient::new(provider, config));
    Ok(pipeline_with_model(model, config))
}

/// Build the batch pipeline around an explicit [`ModelClient`].
pub fn pipeline_with_model(model: Arc<dyn ModelClient>, config: &PipelineConfig) -> BatchPipeline {
    let generator = GenerationClient::new(model).with_preamble(config.system_prompt.clone());
    BatchPipeline::new(generator, config.retry_policy())
        .with_progress(config.progress_callback.clone())
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2CardsError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2CardsError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the model provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`].
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **Gemini key** (`GEMINI_API_KEY`): the default provider, which reads
///    inline PDF parts natively. `GEMINI_MODEL_NAME` overrides the model.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub async fn resolve_provider(
    config: &PipelineConfig,
) -> Result<Arc<dyn LLMProvider>, Pdf2CardsError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let env_model = std::env::var("GEMINI_MODEL_NAME").ok().filter(|m| !m.is_empty());
        let model = config
            .model
            .clone()
            .or(env_model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        return create_provider(DEFAULT_PROVIDER, &model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2CardsError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No model provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY (default), or OPENAI_API_KEY / ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// [`CardSink`] that keeps cards in memory, for runs without a datastore.
#[derive(Default)]
pub struct MemorySink {
    cards: Mutex<Vec<Flashcard>>,
    completed_batches: Mutex<Vec<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cards received so far, assigned dense display indices.
    pub fn cards(&self) -> Vec<Flashcard> {
        let cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        cards
            .iter()
            .enumerate()
            .map(|(i, c)| Flashcard {
                index: i as i64,
                ..c.clone()
            })
            .collect()
    }

    pub fn completed_batches(&self) -> Vec<usize> {
        self.completed_batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CardSink for MemorySink {
    async fn insert_card(&self, card: &Flashcard) -> Result<(), Pdf2CardsError> {
        self.cards
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(card.clone());
        Ok(())
    }

    async fn mark_batch_complete(&self, batch_index: usize, _: usize) -> Result<(), Pdf2CardsError> {
        self.completed_batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch_index);
        Ok(())
    }
}
