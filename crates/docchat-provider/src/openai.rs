use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{LlmMessage, LlmProvider, LlmRequest, LlmResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    Network,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            // 402: OpenRouter out of credits
            401 | 402 | 403 => Self::AuthError,
            400 | 404 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServerError | Self::Timeout | Self::Network
        )
    }
}

/// Classified failure of a provider call. Travels inside `anyhow::Error`;
/// callers recover it with `downcast_ref::<ProviderError>()`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn with_detail(kind: ProviderErrorKind, what: &str, detail: &str) -> Self {
        let tag = if kind.is_retryable() {
            " [retryable]"
        } else {
            ""
        };
        if detail.is_empty() {
            Self::new(kind, format!("chat api error ({what}){tag}"))
        } else {
            Self::new(kind, format!("chat api error ({what}){tag}: {detail}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Chat client for any endpoint speaking the OpenAI `/chat/completions` format.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn send(&self, body: &CompletionRequest) -> Result<reqwest::Response> {
        let sent = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await;

        match sent {
            Ok(response) => Ok(response),
            Err(err) if err.is_timeout() => Err(ProviderError::with_detail(
                ProviderErrorKind::Timeout,
                "timeout",
                &format!("no response within {}s", REQUEST_TIMEOUT.as_secs()),
            )
            .into()),
            Err(err) if err.is_connect() => Err(ProviderError::with_detail(
                ProviderErrorKind::Network,
                "connect",
                &err.to_string(),
            )
            .into()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let response = self.send(&CompletionRequest::from(request)).await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &raw).into());
        }

        let completion: CompletionResponse = response.json().await?;
        completion.into_llm_response()
    }

    async fn health(&self) -> Result<()> {
        self.client
            .get(format!("{}/models", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn classify_failure(status: StatusCode, raw_body: &str) -> ProviderError {
    let kind = ProviderErrorKind::from_status(status);
    let detail = match serde_json::from_str::<ErrorEnvelope>(raw_body) {
        Ok(ErrorEnvelope { error }) if error.kind.is_empty() => error.message,
        Ok(ErrorEnvelope { error }) => format!("{} ({})", error.message, error.kind),
        Err(_) => String::new(),
    };
    ProviderError::with_detail(kind, status.as_str(), &detail)
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl From<LlmRequest> for CompletionRequest {
    /// System text goes first as its own message; empty messages are dropped.
    fn from(request: LlmRequest) -> Self {
        let system = request.system.map(|content| WireMessage {
            role: "system".to_string(),
            content,
        });
        let history = request
            .messages
            .into_iter()
            .filter(|message| !message.content.is_empty())
            .map(|LlmMessage { role, content }| WireMessage { role, content });

        Self {
            model: request.model,
            messages: system.into_iter().chain(history).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl CompletionResponse {
    fn into_llm_response(self) -> Result<LlmResponse> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(ProviderError::new(
                ProviderErrorKind::Unknown,
                "chat api error: empty choices",
            )
            .into());
        };

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            input_tokens: self.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: self.usage.as_ref().map(|u| u.completion_tokens),
            stop_reason: choice.finish_reason.map(normalize_finish_reason),
        })
    }
}

fn normalize_finish_reason(reason: String) -> String {
    match reason.as_str() {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        _ => reason,
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

// OpenRouter omits `type` and sends a numeric `code` instead.
#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}
