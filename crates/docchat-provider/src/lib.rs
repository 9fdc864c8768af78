pub mod openai;
pub mod openai_compat;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{OpenAiProvider, ProviderError, ProviderErrorKind};
pub use openai_compat::{custom, ollama, ollama_with_base, openrouter};
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider type identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    OpenRouter,
    Ollama,
    /// Any other OpenAI-compatible endpoint
    Custom,
    /// Offline echo provider
    Stub,
}

impl ProviderType {
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI | Self::OpenRouter | Self::Custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Uses the default for each provider type when absent
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
    let api_key = config.api_key.as_deref().filter(|key| !key.is_empty());
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::OpenAI => {
            let key = api_key.ok_or_else(|| anyhow!("openai requires api_key"))?;
            match config.base_url.as_deref() {
                Some(base_url) => Arc::new(custom(key, base_url)),
                None => Arc::new(openai_compat::openai(key)),
            }
        }
        ProviderType::OpenRouter => {
            let key = api_key.ok_or_else(|| anyhow!("openrouter requires api_key"))?;
            match config.base_url.as_deref() {
                Some(base_url) => Arc::new(custom(key, base_url)),
                None => Arc::new(openrouter(key)),
            }
        }
        ProviderType::Ollama => match config.base_url.as_deref() {
            Some(base_url) => Arc::new(ollama_with_base(base_url)),
            None => Arc::new(ollama()),
        },
        ProviderType::Custom => {
            let key = api_key.ok_or_else(|| anyhow!("custom provider requires api_key"))?;
            let base_url = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires base_url"))?;
            Arc::new(custom(key, base_url.clone()))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    tracing::debug!("created chat provider: {:?}", config.provider_type);
    Ok(provider)
}

/// Echoes the last message back; used offline and in tests.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let last = request.messages.last().map_or("", |m| m.content.as_str());
        Ok(LlmResponse {
            text: format!("[stub:{}] {last}", request.model),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".to_string()),
        })
    }
}
