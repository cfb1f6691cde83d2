//! HTTP client for the chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::conversation::HistoryEntry;
use crate::settings::RuntimeConfig;

use super::error::{CompletionError, CompletionResult};
use super::types::{ApiErrorBody, ChatMessage, ChatRequest, ChatResponse};

/// Upper bound on generated tokens per reply.
const MAX_TOKENS: u32 = 2048;

/// Extra attempts after a 429, each preceded by a backoff sleep.
const RATE_LIMIT_RETRIES: u32 = 2;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(750);

/// One request/response round trip to the completion API.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Request a completion for the conversation history under `config`.
    async fn complete(
        &self,
        history: &[HistoryEntry],
        config: &RuntimeConfig,
    ) -> CompletionResult<String>;
}

/// Client for an OpenAI-compatible chat-completions API.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
}

impl CompletionClient {
    /// Create a new client with the given request timeout.
    pub fn new(timeout: Duration) -> CompletionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Build the request payload: system prompt first, then the history
    /// oldest-first.
    pub fn build_request(history: &[HistoryEntry], config: &RuntimeConfig) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !config.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: config.system_prompt.clone(),
            });
        }
        for entry in history {
            messages.push(ChatMessage {
                role: entry.role.as_str().to_string(),
                content: entry.content.clone(),
            });
        }

        ChatRequest {
            model: config.model_name.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: MAX_TOKENS,
        }
    }

    async fn complete_once(
        &self,
        request: &ChatRequest,
        config: &RuntimeConfig,
    ) -> CompletionResult<String> {
        let response = self
            .client
            .post(config.completion_url())
            .header("Authorization", format!("Bearer {}", config.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Auth(message),
                StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(message),
                _ => CompletionError::Network(format!("{status}: {message}")),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

        parse_completion_text(body)
    }
}

#[async_trait]
impl CompletionApi for CompletionClient {
    async fn complete(
        &self,
        history: &[HistoryEntry],
        config: &RuntimeConfig,
    ) -> CompletionResult<String> {
        let request = Self::build_request(history, config);

        let mut rate_limit_attempts = 0;
        let mut network_retried = false;

        loop {
            match self.complete_once(&request, config).await {
                Ok(text) => return Ok(text),
                Err(CompletionError::RateLimited(message))
                    if rate_limit_attempts < RATE_LIMIT_RETRIES =>
                {
                    rate_limit_attempts += 1;
                    warn!(attempt = rate_limit_attempts, %message, "rate limited, backing off");
                    tokio::time::sleep(RATE_LIMIT_BACKOFF * rate_limit_attempts).await;
                }
                Err(CompletionError::Network(message)) if !network_retried => {
                    network_retried = true;
                    debug!(%message, "transient network error, retrying once");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Pull the completion text out of a decoded response.
fn parse_completion_text(body: ChatResponse) -> CompletionResult<String> {
    let text = body
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| CompletionError::MalformedResponse("response has no choices".to_string()))?;

    if text.trim().is_empty() {
        return Err(CompletionError::MalformedResponse(
            "completion text is empty".to_string(),
        ));
    }
    Ok(text)
}
