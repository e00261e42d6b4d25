//! Generation client: one model call for one page batch.
//!
//! The request carries a text prompt plus the batch PDF as an inline binary
//! part. The reply is cleaned, parsed, stamped with provenance and validated
//! before any card leaves this module.
//!
//! ## Message Layout
//!
//! 1. **System message**: the generation prompt (preamble + format block)
//! 2. **User message**: short instruction text with the batch PDF attached as
//!    base64 `application/pdf` data

use crate::config::PipelineConfig;
use crate::error::{FailureClass, GenerationFailure};
use crate::pipeline::clean::clean_response;
use crate::pipeline::schema::{validate_envelope, Flashcard};
use crate::pipeline::split::PageBatch;
use crate::prompts::batch_prompt;
use async_trait::async_trait;
use base64::Engine;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Media type of every batch attachment.
pub const PDF_MIME: &str = "application/pdf";

/// An inline binary attachment for a model request.
#[derive(Clone)]
pub struct BinaryPart {
    pub mime_type: String,
    /// Raw (not yet base64-encoded) bytes.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for BinaryPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryPart")
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

/// The generative model, reduced to the one call the pipeline needs.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send `prompt` plus `parts`, returning the model's raw text.
    async fn generate(&self, prompt: &str, parts: &[BinaryPart]) -> Result<String, GenerationFailure>;
}

/// [`ModelClient`] backed by an `edgequake-llm` provider.
pub struct LlmModelClient {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl LlmModelClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout_secs: config.api_timeout_secs,
        }
    }
}

#[async_trait]
impl ModelClient for LlmModelClient {
    async fn generate(&self, prompt: &str, parts: &[BinaryPart]) -> Result<String, GenerationFailure> {
        let start = Instant::now();
        let attachments = parts
            .iter()
            .map(|p| {
                ImageData::new(
                    base64::engine::general_purpose::STANDARD.encode(&p.data),
                    p.mime_type.as_str(),
                )
            })
            .collect();

        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images(
                "Generate flashcards from the attached pages.",
                attachments,
            ),
        ];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = match timeout(Duration::from_secs(self.timeout_secs), call).await {
            Err(_) => {
                return Err(GenerationFailure::Timeout {
                    secs: self.timeout_secs,
                })
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                let class = classify_provider_error(&message);
                return Err(GenerationFailure::Model { message, class });
            }
            Ok(Ok(r)) => r,
        };

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Map a provider error message to a [`FailureClass`].
///
/// Credential and request-shape rejections cannot succeed on retry; anything
/// else (rate limits, 5xx, connection resets) is treated as transient.
pub fn classify_provider_error(message: &str) -> FailureClass {
    let m = message.to_ascii_lowercase();
    const PERMANENT: &[&str] = &[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "api key not valid",
        "authentication",
        "permission denied",
        "invalid request",
        "invalid_request",
        "not configured",
    ];
    if PERMANENT.iter().any(|p| m.contains(p)) {
        FailureClass::Permanent
    } else {
        FailureClass::Transient
    }
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// What the generation client needs to know about the document.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Original filename; stamped into every card's `source`.
    pub filename: String,
    pub language: String,
    /// Absolute 1-based page numbers covered by the batch.
    pub page_numbers: Vec<usize>,
}

/// Turns one [`PageBatch`] into validated flashcards.
#[derive(Clone)]
pub struct GenerationClient {
    model: Arc<dyn ModelClient>,
    preamble: Option<String>,
}

impl GenerationClient {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            preamble: None,
        }
    }

    /// Replace the default prompt preamble (`{language}` is substituted).
    pub fn with_preamble(mut self, preamble: Option<String>) -> Self {
        self.preamble = preamble;
        self
    }

    /// One attempt: prompt, call, clean, parse, stamp, validate.
    pub async fn generate(
        &self,
        batch: &PageBatch,
        request: &GenerationRequest,
    ) -> Result<Vec<Flashcard>, GenerationFailure> {
        let prompt = batch_prompt(
            self.preamble.as_deref(),
            &request.language,
            &request.filename,
            &request.page_numbers,
        );
        let parts = [BinaryPart {
            mime_type: PDF_MIME.to_string(),
            data: batch.pdf_bytes.clone(),
        }];

        let raw = self.model.generate(&prompt, &parts).await?;
        debug!("Batch {}: {} chars of model output", batch.index + 1, raw.len());

        let cleaned = clean_response(&raw);
        let mut value: Value =
            serde_json::from_str(&cleaned).map_err(|e| GenerationFailure::Parse {
                detail: e.to_string(),
            })?;

        stamp_provenance(&mut value, request);
        Ok(validate_envelope(&value)?)
    }
}

/// Overwrite `source`, `page` and `language` on every card object.
///
/// Cards beyond the page count reuse page numbers round-robin
/// (`page_numbers[i % len]`), so the page is a locator, not a guarantee.
fn stamp_provenance(value: &mut Value, request: &GenerationRequest) {
    let Some(cards) = value.get_mut("flashcards").and_then(Value::as_array_mut) else {
        return;
    };
    if cards.len() > request.page_numbers.len() && !request.page_numbers.is_empty() {
        debug!(
            "{} cards for {} pages; page numbers wrap",
            cards.len(),
            request.page_numbers.len()
        );
    }

    for (i, card) in cards.iter_mut().enumerate() {
        let Some(obj) = card.as_object_mut() else {
            continue;
        };
        obj.insert("source".into(), Value::String(request.filename.clone()));
        if !request.page_numbers.is_empty() {
            let page = request.page_numbers[i % request.page_numbers.len()];
            obj.insert("page".into(), Value::String(page.to_string()));
        }
        obj.insert("language".into(), Value::String(request.language.clone()));
    }
}
