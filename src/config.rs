//! Configuration types for the document-to-flashcard pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct for every knob keeps it trivial to
//! share a config between the HTTP server and the CLI, and to log exactly which
//! settings produced a given set of cards.

use crate::error::Pdf2CardsError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Default model when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Default provider: the model receives the batch as inline PDF data, which
/// Gemini accepts natively.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Configuration for turning one PDF into flashcards.
///
/// # Example
/// ```rust
/// use edgequake_pdf2cards::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .pages_per_batch(5)
///     .max_retries(3)
///     .language("de")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Pages per generation request. Default: 5.
    ///
    /// Five pages give the model enough context to pick meaningful terms while
    /// keeping each response well under the output-token limit.
    pub pages_per_batch: usize,

    /// Total attempts per batch (first call included). Default: 3.
    pub max_retries: u32,

    /// Delay before the second attempt, in milliseconds. Default: 1000.
    ///
    /// Doubles after each failed attempt. With the default 3 attempts the
    /// waits are 1 s and then 2 s.
    pub initial_retry_delay_ms: u64,

    /// Retry when the model answers with unparseable or invalid JSON. Default: true.
    pub retry_malformed: bool,

    /// Language the flashcards are written in. Default: "en".
    pub language: String,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate per batch. Default: 8192.
    pub max_tokens: usize,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom generation prompt preamble. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pages_per_batch: 5,
            max_retries: 3,
            initial_retry_delay_ms: 1000,
            retry_malformed: true,
            language: "en".to_string(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 8192,
            api_timeout_secs: 60,
            system_prompt: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("pages_per_batch", &self.pages_per_batch)
            .field("max_retries", &self.max_retries)
            .field("initial_retry_delay_ms", &self.initial_retry_delay_ms)
            .field("retry_malformed", &self.retry_malformed)
            .field("language", &self.language)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The retry settings as consumed by [`crate::pipeline::retry`].
    pub fn retry_policy(&self) -> crate::pipeline::retry::RetryPolicy {
        crate::pipeline::retry::RetryPolicy {
            max_retries: self.max_retries,
            initial_delay_ms: self.initial_retry_delay_ms,
            retry_malformed: self.retry_malformed,
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn pages_per_batch(mut self, n: usize) -> Self {
        self.config.pages_per_batch = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn initial_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.initial_retry_delay_ms = ms;
        self
    }

    pub fn retry_malformed(mut self, v: bool) -> Self {
        self.config.retry_malformed = v;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2CardsError> {
        let c = &self.config;
        if c.pages_per_batch == 0 {
            return Err(Pdf2CardsError::InvalidConfig(
                "pages_per_batch must be ≥ 1".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(Pdf2CardsError::InvalidConfig(
                "max_retries must be ≥ 1 (it counts the first attempt)".into(),
            ));
        }
        if c.language.trim().chars().count() < 2 {
            return Err(Pdf2CardsError::InvalidConfig(format!(
                "language must be at least 2 characters, got '{}'",
                c.language
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.pages_per_batch, 5);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.initial_retry_delay_ms, 1000);
        assert!(c.retry_malformed);
        assert_eq!(c.language, "en");
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = PipelineConfig::builder().pages_per_batch(0).build().unwrap_err();
        assert!(matches!(err, Pdf2CardsError::InvalidConfig(_)));
    }

    #[test]
    fn zero_retries_rejected() {
        assert!(PipelineConfig::builder().max_retries(0).build().is_err());
    }

    #[test]
    fn short_language_rejected() {
        assert!(PipelineConfig::builder().language("e").build().is_err());
        assert!(PipelineConfig::builder().language("fr").build().is_ok());
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let c = PipelineConfig::builder()
            .max_retries(4)
            .initial_retry_delay_ms(10)
            .retry_malformed(false)
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_retries, 4);
        assert_eq!(p.initial_delay_ms, 10);
        assert!(!p.retry_malformed);
    }

    #[test]
    fn default_retries_wait_one_then_two_seconds() {
        let p = PipelineConfig::default().retry_policy();
        let waits: Vec<u64> = (0..p.attempt_limit() - 1)
            .map(|attempt| p.delay_for(attempt).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2]);
    }
}
