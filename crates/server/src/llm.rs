//! HTTP chat-completion providers behind [`LlmClient`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use relaydesk_agent::llm::{ChatContent, ChatMessage, ChatRole, ContentPart, LlmClient};
use relaydesk_core::config::{LlmConfig, LlmProvider};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1_024;
const TEMPERATURE: f32 = 0.7;
const BASE_BACKOFF_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("llm provider `{0}` requires an api key")]
    MissingApiKey(&'static str),
    #[error("invalid provider header: {0}")]
    InvalidHeader(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(5)))
}

/// Builds the configured provider.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let api_key = config.api_key.as_ref().map(|key| key.expose_secret().trim().to_owned());
    match config.provider {
        LlmProvider::OpenAi => {
            let key = api_key.filter(|key| !key.is_empty()).ok_or(ProviderError::MissingApiKey("openai"))?;
            let base = config.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_owned());
            Ok(Arc::new(OpenAiCompatibleClient::new(
                &base,
                Some(&key),
                &config.model,
                timeout,
                config.max_retries,
            )?))
        }
        LlmProvider::Ollama => {
            let base = config.base_url.clone().unwrap_or_else(|| "http://localhost:11434".to_owned());
            Ok(Arc::new(OpenAiCompatibleClient::new(
                &base,
                api_key.as_deref().filter(|key| !key.is_empty()),
                &config.model,
                timeout,
                config.max_retries,
            )?))
        }
        LlmProvider::Anthropic => {
            let key =
                api_key.filter(|key| !key.is_empty()).ok_or(ProviderError::MissingApiKey("anthropic"))?;
            let base = config.base_url.clone().unwrap_or_else(|| ANTHROPIC_BASE_URL.to_owned());
            Ok(Arc::new(AnthropicClient::new(&base, &key, &config.model, timeout, config.max_retries)?))
        }
    }
}

/// `/chat/completions` speaker: OpenAI itself and Ollama's compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|error| ProviderError::InvalidHeader(error.to_string()))?,
            );
        }
        let client = reqwest::Client::builder().default_headers(headers).timeout(timeout).build()?;
        Ok(Self {
            client,
            url: chat_completions_url(base_url),
            model: model.to_owned(),
            max_retries,
        })
    }

    fn body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "messages": messages.iter().map(openai_message).collect::<Vec<_>>(),
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        })
    }
}

pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_owned()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn openai_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };
    let content = match &message.content {
        ChatContent::Text(text) => json!(text),
        ChatContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::ImageUrl { url } => {
                        json!({"type": "image_url", "image_url": {"url": url}})
                    }
                })
                .collect(),
        ),
    };
    json!({"role": role, "content": content})
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.body(messages);
        let raw = post_with_retry(&self.client, &self.url, &body, self.max_retries).await?;
        raw.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("chat completion response had no message content"))
    }
}

/// Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|error| ProviderError::InvalidHeader(error.to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        let client = reqwest::Client::builder().default_headers(headers).timeout(timeout).build()?;
        let base = base_url.trim().trim_end_matches('/');
        let url = if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        };
        Ok(Self { client, url, model: model.to_owned(), max_retries })
    }

    /// System turns are lifted into the top-level `system` field.
    fn body(&self, messages: &[ChatMessage]) -> Value {
        let system = messages
            .iter()
            .filter(|message| message.role == ChatRole::System)
            .map(|message| message.content.as_text())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<Value> = messages
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .map(anthropic_message)
            .collect();
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
            "system": system,
            "messages": turns,
        })
    }
}

fn anthropic_message(message: &ChatMessage) -> Value {
    let role = if message.role == ChatRole::Assistant { "assistant" } else { "user" };
    let content = match &message.content {
        ChatContent::Text(text) => json!(text),
        ChatContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::ImageUrl { url } => anthropic_image(url),
                })
                .collect(),
        ),
    };
    json!({"role": role, "content": content})
}

fn anthropic_image(url: &str) -> Value {
    match url.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
        Some((media_type, data)) => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        None => json!({"type": "image", "source": {"type": "url", "url": url}}),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.body(messages);
        let raw = post_with_retry(&self.client, &self.url, &body, self.max_retries).await?;
        let text = raw
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| anyhow!("messages response had no content blocks"))?;
        Ok(text)
    }
}

/// POSTs JSON, retrying transport failures and retryable statuses with
/// exponential backoff.
pub async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let mut attempt = 0;
    loop {
        match client.post(url).json(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(event_name = "llm.request.completed", url, attempt, "provider replied");
                    return Ok(response.json::<Value>().await?);
                }
                let raw = response.text().await.unwrap_or_default();
                if attempt < max_retries && should_retry_status(status.as_u16()) {
                    warn!(
                        event_name = "llm.request.retry",
                        url,
                        attempt,
                        status = status.as_u16(),
                        "provider returned a retryable status"
                    );
                    sleep(backoff(attempt)).await;
                    attempt += 1;
                    continue;
                }
                return Err(anyhow!("provider returned HTTP {}: {raw}", status.as_u16()));
            }
            Err(error) if attempt < max_retries && (error.is_connect() || error.is_timeout()) => {
                warn!(
                    event_name = "llm.request.retry",
                    url,
                    attempt,
                    error = %error,
                    "provider unreachable"
                );
                sleep(backoff(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error.into()),
        }
    }
}
