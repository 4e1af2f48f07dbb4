//! OpenAI-compatible HTTP client for self-hosted VLM servers.
//!
//! The default deployment serves a single vision model through vLLM's
//! `/v1/chat/completions` endpoint. vLLM accepts `repetition_penalty` as an
//! extra sampling field, which the JSON extraction stage depends on, so this
//! client talks to the endpoint directly instead of through a generic
//! provider.
//!
//! ## Retry Strategy
//!
//! 429 and 5xx responses, timeouts and connection errors are retried with
//! exponential backoff (`retry_backoff_ms * 2^attempt`, capped at one minute).
//! Other 4xx statuses mean the request itself is wrong and fail immediately.

use crate::error::VlmError;
use crate::pipeline::llm::{SamplingConfig, UserContent, VisionLanguageModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL including the `/v1` suffix.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-request timeout. Default: 300 s (a full balance sheet is long).
    pub timeout_secs: u64,
    /// Retries after the first attempt. Default: 2.
    pub max_retries: u32,
    /// Base backoff between retries. Default: 1000 ms.
    pub retry_backoff_ms: u64,
}

impl Default for OpenAiCompatibleConfig {
    fn default() -> Self {
        Self {
            api_url: "http://host.docker.internal:8000/v1".to_string(),
            api_key: "token-abc".to_string(),
            model: "qwen3vl-8b-instruct-fp8".to_string(),
            timeout_secs: 300,
            max_retries: 2,
            retry_backoff_ms: 1000,
        }
    }
}

/// [`VisionLanguageModel`] backed by a `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    http: reqwest::Client,
    config: OpenAiCompatibleConfig,
    endpoint: String,
}

impl OpenAiCompatibleModel {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, VlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VlmError::Transport(e.to_string()))?;
        let endpoint = format!("{}/chat/completions", config.api_url.trim_end_matches('/'));
        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &OpenAiCompatibleConfig {
        &self.config
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> Result<String, VlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VlmError::Timeout {
                        secs: self.config.timeout_secs,
                    }
                } else {
                    VlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VlmError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VlmError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "{}: {} input tokens, {} output tokens",
                self.config.model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(VlmError::EmptyResponse)
    }
}

#[async_trait]
impl VisionLanguageModel for OpenAiCompatibleModel {
    async fn complete(
        &self,
        system_prompt: &str,
        content: &UserContent,
        sampling: &SamplingConfig,
    ) -> Result<String, VlmError> {
        let body = ChatRequest::new(&self.config.model, system_prompt, content, sampling);
        let start = Instant::now();

        let mut attempt = 0u32;
        loop {
            match self.send_once(&body).await {
                Ok(text) => {
                    debug!("{}: completed in {:?}", self.config.model, start.elapsed());
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = backoff_ms(self.config.retry_backoff_ms, attempt);
                    attempt += 1;
                    warn!(
                        "{}: attempt {} failed ({}), retry {}/{} after {}ms",
                        self.config.model, attempt, e, attempt, self.config.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Longest single wait between retries.
const MAX_BACKOFF_MS: u64 = 60_000;

/// `base * 2^attempt`, saturating and capped at [`MAX_BACKOFF_MS`].
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS)
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
    temperature: f32,
    presence_penalty: f32,
    repetition_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

impl<'a> ChatRequest<'a> {
    fn new(
        model: &'a str,
        system_prompt: &str,
        content: &UserContent,
        sampling: &SamplingConfig,
    ) -> Self {
        let mut parts = vec![ContentPart::Text {
            text: content.text.clone(),
        }];
        parts.extend(content.images.iter().map(|img| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", img.mime_type, img.data),
            },
        }));

        Self {
            model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: vec![ContentPart::Text {
                        text: system_prompt.to_string(),
                    }],
                },
                RequestMessage {
                    role: "user",
                    content: parts,
                },
            ],
            temperature: sampling.temperature,
            presence_penalty: sampling.presence_penalty,
            repetition_penalty: sampling.repetition_penalty,
            max_tokens: sampling.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
