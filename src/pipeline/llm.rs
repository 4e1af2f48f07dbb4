//! The vision-language model capability consumed by both stages.
//!
//! Stages never talk to an HTTP API directly. They hand a system prompt, a
//! [`UserContent`] (text and/or images) and a fixed [`SamplingConfig`] to a
//! [`VisionLanguageModel`] and get text back. Two implementations ship with
//! the crate:
//!
//! - [`crate::client::OpenAiCompatibleModel`]: a vLLM-style
//!   `/chat/completions` endpoint, the default deployment.
//! - [`ProviderModel`]: any `edgequake_llm` provider (OpenAI, Anthropic,
//!   Gemini, Ollama, ...).
//!
//! Timeouts and retries belong to the implementation. Whatever error is left
//! after its own policy is opaque to the pipeline.

use crate::error::VlmError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Decoding parameters for one model call.
///
/// The per-stage values are constants ([`Self::OCR`], [`Self::JSON_EXTRACTION`]);
/// only `max_tokens` is filled in from [`crate::PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub presence_penalty: f32,
    /// vLLM-style multiplicative penalty; 1.0 disables it.
    pub repetition_penalty: f32,
    pub max_tokens: Option<usize>,
}

impl SamplingConfig {
    /// Stage 1: deterministic transcription.
    pub const OCR: Self = Self {
        temperature: 0.0,
        presence_penalty: 0.0,
        repetition_penalty: 1.0,
        max_tokens: None,
    };

    /// Stage 2: deterministic extraction that discourages repeated rows.
    pub const JSON_EXTRACTION: Self = Self {
        temperature: 0.0,
        presence_penalty: 1.2,
        repetition_penalty: 1.5,
        max_tokens: None,
    };

    pub fn with_max_tokens(self, max_tokens: Option<usize>) -> Self {
        Self { max_tokens, ..self }
    }
}

/// The user turn of a request: instruction text followed by inline images.
#[derive(Debug, Clone, Default)]
pub struct UserContent {
    pub text: String,
    pub images: Vec<ImageData>,
}

impl UserContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(text: impl Into<String>, image: ImageData) -> Self {
        Self {
            text: text.into(),
            images: vec![image],
        }
    }
}

/// `complete(systemPrompt, userContent, samplingConfig) -> text`.
#[async_trait]
pub trait VisionLanguageModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        content: &UserContent,
        sampling: &SamplingConfig,
    ) -> Result<String, VlmError>;

    /// Model identifier for logs.
    fn name(&self) -> &str;
}

/// Adapter exposing an `edgequake_llm` provider as a [`VisionLanguageModel`].
///
/// Provider APIs have no repetition penalty, so that field is dropped;
/// temperature, presence penalty and the token cap are forwarded.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let label = format!("{}/{}", provider.name(), provider.model());
        Self { provider, label }
    }
}

impl std::fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderModel")
            .field("label", &self.label)
            .finish()
    }
}

#[async_trait]
impl VisionLanguageModel for ProviderModel {
    async fn complete(
        &self,
        system_prompt: &str,
        content: &UserContent,
        sampling: &SamplingConfig,
    ) -> Result<String, VlmError> {
        let start = Instant::now();
        let messages = build_messages(system_prompt, content);
        let options = build_options(sampling);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| VlmError::Provider(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.label,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(response.content)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

fn build_messages(system_prompt: &str, content: &UserContent) -> Vec<ChatMessage> {
    let user = if content.images.is_empty() {
        ChatMessage::user(content.text.as_str())
    } else {
        ChatMessage::user_with_images(content.text.as_str(), content.images.clone())
    };
    vec![ChatMessage::system(system_prompt), user]
}

fn build_options(sampling: &SamplingConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(sampling.temperature),
        presence_penalty: Some(sampling.presence_penalty),
        max_tokens: sampling.max_tokens,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_constants() {
        assert_eq!(SamplingConfig::OCR.temperature, 0.0);
        assert_eq!(SamplingConfig::OCR.presence_penalty, 0.0);
        assert_eq!(SamplingConfig::OCR.repetition_penalty, 1.0);
        assert_eq!(SamplingConfig::JSON_EXTRACTION.temperature, 0.0);
        assert!(SamplingConfig::JSON_EXTRACTION.presence_penalty > 0.0);
        assert!(
            SamplingConfig::JSON_EXTRACTION.repetition_penalty
                > SamplingConfig::OCR.repetition_penalty
        );
    }

    #[test]
    fn max_tokens_override_keeps_stage_values() {
        let s = SamplingConfig::JSON_EXTRACTION.with_max_tokens(Some(8192));
        assert_eq!(s.max_tokens, Some(8192));
        assert_eq!(s.presence_penalty, 1.2);
    }

    #[test]
    fn build_options_forwards_sampling() {
        let opts = build_options(&SamplingConfig::JSON_EXTRACTION.with_max_tokens(Some(100)));
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.presence_penalty, Some(1.2));
        assert_eq!(opts.max_tokens, Some(100));
    }
}
