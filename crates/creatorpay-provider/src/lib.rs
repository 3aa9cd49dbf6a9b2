pub mod anthropic;
pub mod openai;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServerError | Self::Timeout)
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .unwrap_or_default()
}

pub(crate) fn send_error(provider: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("{provider} api error (timeout) [retryable]: request timed out after 60s")
    } else if e.is_connect() {
        anyhow!("{provider} api error (connect) [retryable]: {e}")
    } else {
        e.into()
    }
}

pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    detail: Option<(String, String)>,
) -> anyhow::Error {
    let retryable = if ProviderErrorKind::from_status(status).is_retryable() {
        " [retryable]"
    } else {
        ""
    };
    match detail {
        Some((kind, message)) => {
            anyhow!("{provider} api error ({status}){retryable}: {message} ({kind})")
        }
        None => anyhow!("{provider} api error ({status}){retryable}"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAI,
    /// Offline provider that never calls out; for demos and tests
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::Anthropic => {
            let key = config
                .api_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| anyhow!("anthropic requires api_key"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.anthropic.com");
            Arc::new(AnthropicProvider::new(key.clone(), base_url))
        }
        ProviderType::OpenAI => {
            let key = config
                .api_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| anyhow!("openai requires api_key"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            Arc::new(OpenAiProvider::new(key.clone(), base_url))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    tracing::info!("created llm provider: {:?}", config.provider_type);
    Ok(provider)
}

/// Answers every forced tool call with an empty object and echoes plain prompts.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        if let Some(tool) = request.forced_tool {
            return Ok(LlmResponse {
                text: String::new(),
                content: vec![ContentBlock::ToolUse {
                    id: "stub-call".into(),
                    name: tool,
                    input: serde_json::json!({}),
                }],
                input_tokens: None,
                output_tokens: None,
                stop_reason: Some("tool_use".into()),
            });
        }
        let user_text = request
            .messages
            .last()
            .map(|m| m.text.clone())
            .unwrap_or_default();
        let full_text = format!("[stub:{}] {}", request.model, user_text);
        Ok(LlmResponse {
            text: full_text.clone(),
            content: vec![ContentBlock::Text { text: full_text }],
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}
