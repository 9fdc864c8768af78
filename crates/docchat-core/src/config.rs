use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use docchat_memory::{
    ChunkerConfig, DistanceMetric, EmbeddingProvider, OllamaEmbeddingProvider,
    OpenAiEmbeddingProvider, StubEmbeddingProvider, DEFAULT_EMBEDDING_TIMEOUT, DEFAULT_TOP_K,
};
use docchat_provider::{create_provider, LlmProvider, ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocchatConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub distance: DistanceMetric,
    /// Rewrite follow-ups into standalone questions before retrieval.
    #[serde(default)]
    pub condense_question: bool,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for DocchatConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            distance: DistanceMetric::default(),
            condense_question: false,
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAI,
    Ollama,
    Stub,
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Ollama
}

fn default_embedding_model() -> String {
    "all-minilm".to_string()
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    64
}

fn default_embedding_timeout_ms() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Provider default when absent.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-request HTTP timeout for the embedding endpoint.
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            api_key: String::new(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

fn default_llm_provider() -> ProviderType {
    ProviderType::OpenRouter
}

fn default_llm_model() -> String {
    "mistralai/mistral-7b-instruct:free".to_string()
}

fn default_llm_api_key() -> String {
    "${LLM_API_KEY}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: ProviderType,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Provider default when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,
    #[serde(default = "docchat_provider::default_max_tokens")]
    pub max_tokens: u32,
    /// Persona placed ahead of the QA instruction.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            endpoint: None,
            api_key: default_llm_api_key(),
            max_tokens: docchat_provider::default_max_tokens(),
            system_prompt: None,
        }
    }
}

impl DocchatConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.chunk_size, self.chunk_overlap)
    }

    /// Expand `${VAR}` placeholders in every string field.
    pub fn resolve_env(&mut self) {
        self.embedding.model = resolve_env_var(&self.embedding.model);
        self.embedding.api_key = resolve_env_var(&self.embedding.api_key);
        if let Some(url) = self.embedding.base_url.as_mut() {
            *url = resolve_env_var(url);
        }
        self.llm.model = resolve_env_var(&self.llm.model);
        self.llm.api_key = resolve_env_var(&self.llm.api_key);
        if let Some(endpoint) = self.llm.endpoint.as_mut() {
            *endpoint = resolve_env_var(endpoint);
        }
        if let Some(prompt) = self.llm.system_prompt.as_mut() {
            *prompt = resolve_env_var(prompt);
        }
    }

    /// `LLM_API_KEY`, `LLM_MODEL`, `LLM_ENDPOINT` and `EMBEDDING_MODEL` win
    /// over file values when set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if let Some(key) = get("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = get("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(endpoint) = get("LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    pub fn build_llm(&self) -> Result<Arc<dyn LlmProvider>> {
        let mut config = ProviderConfig::new(self.llm.provider);
        if !self.llm.api_key.is_empty() {
            config = config.with_api_key(self.llm.api_key.clone());
        }
        if let Some(endpoint) = self.llm.endpoint.as_deref().filter(|e| !e.is_empty()) {
            config = config.with_base_url(endpoint);
        }
        create_provider(&config)
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let cfg = &self.embedding;
        let base_url = cfg.base_url.clone().filter(|url| !url.is_empty());
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let provider: Arc<dyn EmbeddingProvider> = match cfg.provider {
            EmbeddingProviderKind::OpenAI => {
                if cfg.api_key.is_empty() {
                    return Err(anyhow!("openai embedding provider requires api_key"));
                }
                let mut provider = OpenAiEmbeddingProvider::with_model(
                    cfg.api_key.clone(),
                    cfg.model.clone(),
                    cfg.dimensions,
                )
                .with_timeout(timeout);
                if let Some(url) = base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
            EmbeddingProviderKind::Ollama => {
                let mut provider =
                    OllamaEmbeddingProvider::with_model(cfg.model.clone(), cfg.dimensions)
                        .with_timeout(timeout);
                if let Some(url) = base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
            EmbeddingProviderKind::Stub => Arc::new(StubEmbeddingProvider::new(cfg.dimensions)),
        };
        tracing::debug!("created embedding provider: {:?}", cfg.provider);
        Ok(provider)
    }
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Read, expand, override and validate. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<DocchatConfig> {
    let mut config: DocchatConfig = if path.exists() {
        read_yaml_file(path)?
    } else {
        tracing::debug!("config file {} not found, using defaults", path.display());
        DocchatConfig::default()
    };

    config.resolve_env();
    config.apply_env_overrides();
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &DocchatConfig) -> Result<()> {
    config
        .chunker()
        .validate()
        .context("invalid chunking settings")?;

    if config.top_k == 0 {
        return Err(anyhow!("top_k must be greater than zero"));
    }
    if config.embedding.batch_size == 0 {
        return Err(anyhow!("embedding.batch_size must be greater than zero"));
    }
    if config.embedding.timeout_ms == 0 {
        return Err(anyhow!("embedding.timeout_ms must be greater than zero"));
    }
    if config.embedding.dimensions == 0 {
        return Err(anyhow!("embedding.dimensions must be greater than zero"));
    }
    if config.embedding.provider == EmbeddingProviderKind::OpenAI
        && config.embedding.api_key.is_empty()
    {
        return Err(anyhow!("embedding.api_key is required for the openai provider"));
    }
    if config.llm.provider.requires_api_key() && config.llm.api_key.is_empty() {
        return Err(anyhow!(
            "llm.api_key is required for provider {:?}; set LLM_API_KEY",
            config.llm.provider
        ));
    }
    if config.llm.provider == ProviderType::Custom && config.llm.endpoint.is_none() {
        return Err(anyhow!("llm.endpoint is required for the custom provider"));
    }

    if let Some(endpoint) = config.llm.endpoint.as_deref() {
        url::Url::parse(endpoint)
            .with_context(|| format!("llm.endpoint is not a valid URL: {endpoint}"))?;
    }
    if let Some(base_url) = config.embedding.base_url.as_deref() {
        url::Url::parse(base_url)
            .with_context(|| format!("embedding.base_url is not a valid URL: {base_url}"))?;
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stub_config() -> DocchatConfig {
        let mut config = DocchatConfig::default();
        config.llm.provider = ProviderType::Stub;
        config.embedding.provider = EmbeddingProviderKind::Stub;
        config
    }

    #[test]
    fn defaults_follow_documented_values() {
        let config = DocchatConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.distance, DistanceMetric::Cosine);
        assert!(!config.condense_question);
        assert_eq!(config.embedding.model, "all-minilm");
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.embedding.timeout_ms, 60_000);
        assert_eq!(config.llm.provider, ProviderType::OpenRouter);
        assert_eq!(config.llm.model, "mistralai/mistral-7b-instruct:free");
        assert_eq!(config.llm.max_tokens, 1024);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
chunk_size: 500
distance: l2
llm:
  provider: ollama
  model: llama3
"#;
        let config: DocchatConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.distance, DistanceMetric::L2);
        assert_eq!(config.llm.provider, ProviderType::Ollama);
        assert_eq!(config.llm.api_key, "${LLM_API_KEY}");
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = stub_config();
        let env: HashMap<&str, &str> = HashMap::from([
            ("LLM_API_KEY", "sk-or-123"),
            ("LLM_MODEL", "openai/gpt-4o-mini"),
            ("LLM_ENDPOINT", "http://localhost:8080/v1"),
            ("EMBEDDING_MODEL", "nomic-embed-text"),
        ]);
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "sk-or-123");
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
        assert_eq!(config.llm.endpoint.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(config.embedding.model, "nomic-embed-text");
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut config = stub_config();
        config.llm.model = "keep-me".into();
        config.apply_overrides_from(|key| (key == "LLM_MODEL").then(String::new));
        assert_eq!(config.llm.model, "keep-me");
    }

    #[test]
    fn hosted_llm_requires_key() {
        let mut config = stub_config();
        config.llm.provider = ProviderType::OpenRouter;
        config.llm.api_key = String::new();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("LLM_API_KEY"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut config = stub_config();
        config.chunk_overlap = config.chunk_size;
        assert!(validate_config(&config).is_err());

        let mut config = stub_config();
        config.top_k = 0;
        assert!(validate_config(&config)
            .unwrap_err()
            .to_string()
            .contains("top_k"));

        let mut config = stub_config();
        config.embedding.batch_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = stub_config();
        config.embedding.timeout_ms = 0;
        assert!(validate_config(&config)
            .unwrap_err()
            .to_string()
            .contains("timeout_ms"));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let mut config = stub_config();
        config.llm.endpoint = Some("not a url".into());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("llm.endpoint"));
    }

    #[test]
    fn load_config_reads_yaml_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docchat.yaml");
        fs::write(
            &path,
            "top_k: 2\nembedding:\n  provider: stub\n  dimensions: 16\nllm:\n  provider: stub\n  system_prompt: You are a careful assistant.\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.top_k, 2);
        assert_eq!(config.embedding.dimensions, 16);
        assert_eq!(
            config.llm.system_prompt.as_deref(),
            Some("You are a careful assistant.")
        );
    }

    #[test]
    fn load_config_reports_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docchat.yaml");
        fs::write(&path, "chunk_size: [not, a, number]\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse yaml file"));
    }

    #[test]
    fn example_config_parses() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../docchat.example.yaml");
        let config: DocchatConfig = read_yaml_file(&path).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
        assert_eq!(config.llm.api_key, "${LLM_API_KEY}");
        assert!(config.llm.system_prompt.is_some());
    }

    #[test]
    fn stub_config_builds_providers() {
        let config = stub_config();
        assert!(config.build_llm().is_ok());
        let embedder = config.build_embedder().unwrap();
        assert_eq!(embedder.model_id(), "stub");
        assert_eq!(embedder.dimensions(), 384);
        assert!(!embedder.is_semantic());
    }

    #[test]
    fn resolve_env_var_replaces_env_placeholder() {
        let expected = std::env::var("PATH").unwrap();
        assert_eq!(resolve_env_var("${PATH}"), expected);
    }

    #[test]
    fn resolve_env_var_returns_raw_when_not_placeholder() {
        assert_eq!(resolve_env_var("plain-value"), "plain-value");
    }

    #[test]
    fn resolve_env_var_unclosed_bracket() {
        assert_eq!(resolve_env_var("prefix_${UNCLOSED"), "prefix_${UNCLOSED");
    }
}
