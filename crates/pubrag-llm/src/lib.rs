//! Chat-completion client for OpenAI-compatible APIs.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use pubrag_core::config::LlmSettings;
use pubrag_core::error::{Error, LlmErrorKind, Result};
use pubrag_core::traits::LlmProvider;
use pubrag_core::types::{GenerationOptions, Prompt};

pub mod retry;

pub use retry::RetryConfig;

/// Longest slice of an error body carried into the error message.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One failed attempt, before retry policy is applied.
struct AttemptError {
    error: Error,
    retry_after: Option<Duration>,
}

impl AttemptError {
    fn retryable(&self) -> bool {
        matches!(self.error, Error::Llm { kind: LlmErrorKind::RateLimited, .. })
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    retry: RetryConfig,
}

impl OpenAiChatClient {
    /// A client without an API key is still constructed; `generate` then
    /// fails with `NotConfigured`.
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("no LLM API key configured; queries will fail until one is set");
        }
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            retry: RetryConfig::from_settings(settings),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, api_key: &str, body: &ChatRequest<'_>) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError { error: transport_error(&e), retry_after: None })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(AttemptError { error: status_error(status, &text), retry_after });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AttemptError {
            error: Error::llm(LlmErrorKind::InvalidResponse, format!("unparseable completion body: {e}")),
            retry_after: None,
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AttemptError {
                error: Error::llm(LlmErrorKind::InvalidResponse, "completion has no choices"),
                retry_after: None,
            })
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &Prompt, options: &GenerationOptions) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(Error::llm(LlmErrorKind::NotConfigured, "no API key set (llm.api_key or OPENAI_API_KEY)"));
        };
        let model = options.model.as_deref().unwrap_or(&self.model);
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
        };

        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            match self.attempt(api_key, &body).await {
                Ok(answer) => {
                    if attempt > 0 {
                        info!(model, retries = attempt, elapsed_ms = start.elapsed().as_millis(), "completion succeeded after retries");
                    } else {
                        debug!(model, elapsed_ms = start.elapsed().as_millis(), "completion received");
                    }
                    return Ok(answer);
                }
                Err(failed) if failed.retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, failed.retry_after);
                    warn!(model, attempt = attempt + 1, delay_ms = delay.as_millis(), error = %failed.error, "rate limited; backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failed) => {
                    warn!(model, attempts = attempt + 1, error = %failed.error, "completion failed");
                    return Err(failed.error);
                }
            }
        }
    }
}

fn transport_error(e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::llm(LlmErrorKind::Timeout, format!("request timed out: {e}"))
    } else {
        Error::llm(LlmErrorKind::Network, e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    let kind = match status.as_u16() {
        401 | 403 => LlmErrorKind::Unauthorized,
        429 => LlmErrorKind::RateLimited,
        408 | 504 => LlmErrorKind::Timeout,
        _ => LlmErrorKind::Api,
    };
    Error::llm(kind, message)
}
