//! Endpoints that speak the OpenAI chat format under a different base URL.

use crate::OpenAiProvider;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

pub fn openai(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, OPENAI_BASE_URL)
}

/// OpenRouter API, multi-model router
/// https://openrouter.ai/docs
pub fn openrouter(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, OPENROUTER_BASE_URL)
}

pub fn ollama() -> OpenAiProvider {
    ollama_with_base(OLLAMA_BASE_URL)
}

pub fn ollama_with_base(base_url: impl Into<String>) -> OpenAiProvider {
    // Ollama ignores the key but the client always sends one
    OpenAiProvider::new("ollama", base_url)
}

pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}
