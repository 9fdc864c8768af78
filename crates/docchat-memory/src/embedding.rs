use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failures while embedding chunks or queries. Any of these leaves no index
/// behind.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {0:#}")]
    Provider(#[source] anyhow::Error),
    #[error("embedding count mismatch: expected {expected}, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("index was built with model {index_model}, query embedder is {provider_model}")]
    ModelMismatch {
        index_model: String,
        provider_model: String,
    },
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingResult {
    fn empty(model: &str, dimensions: usize) -> Self {
        Self {
            embeddings: Vec::new(),
            model: model.to_string(),
            dimensions,
        }
    }
}

/// Turns strings into vectors, one per input, in input order.
///
/// Implementations only speak their wire format; count and dimension checks
/// happen in the index builder.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult>;
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    /// False for the hash-based stub, whose vectors carry no meaning.
    fn is_semantic(&self) -> bool {
        true
    }
}

/// Upper bound on one embedding HTTP call, connect to last body byte.
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("embedding request to {url} failed"))?
        .error_for_status()?;
    response
        .json::<R>()
        .await
        .with_context(|| format!("unexpected embedding response from {url}"))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

/// `POST {base}/embeddings` in the OpenAI format. Works for OpenAI itself and
/// for gateways that mirror it.
#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    base_url: String,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, "text-embedding-3-small".to_string(), 1536)
    }

    pub fn with_model(api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            client: http_client(DEFAULT_EMBEDDING_TIMEOUT),
            api_key,
            model,
            dimensions,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
    // Some gateways leave this out.
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

/// Items may arrive in any order; `index` says which input each belongs to.
fn order_by_index(mut items: Vec<EmbeddingItem>) -> Result<Vec<Vec<f32>>> {
    items.sort_by_key(|item| item.index);
    if let Some((position, item)) = items
        .iter()
        .enumerate()
        .find(|(position, item)| item.index != *position)
    {
        return Err(anyhow!(
            "embedding response has a gap or duplicate at position {position} (index {})",
            item.index
        ));
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::empty(&self.model, self.dimensions));
        }

        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };
        let response: EmbeddingsResponse = post_json(
            &self.client,
            &endpoint(&self.base_url, "embeddings"),
            Some(&self.api_key),
            &body,
        )
        .await?;

        let model = response.model.unwrap_or_else(|| self.model.clone());
        let embeddings = order_by_index(response.data)?;
        let dimensions = embeddings.first().map_or(self.dimensions, Vec::len);
        Ok(EmbeddingResult {
            embeddings,
            model,
            dimensions,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Local Ollama server, `POST {base}/api/embed`.
#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    model: String,
    dimensions: usize,
    base_url: String,
}

impl OllamaEmbeddingProvider {
    /// `all-minilm` is Ollama's build of sentence-transformers/all-MiniLM-L6-v2.
    pub fn new() -> Self {
        Self::with_model("all-minilm".to_string(), 384)
    }

    pub fn with_model(model: String, dimensions: usize) -> Self {
        Self {
            client: http_client(DEFAULT_EMBEDDING_TIMEOUT),
            model,
            dimensions,
            base_url: "http://localhost:11434".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }
}

impl Default for OllamaEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::empty(&self.model, self.dimensions));
        }

        let body = OllamaEmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response: OllamaEmbedResponse = post_json(
            &self.client,
            &endpoint(&self.base_url, "api/embed"),
            None,
            &body,
        )
        .await?;

        let dimensions = response
            .embeddings
            .first()
            .map_or(self.dimensions, Vec::len);
        Ok(EmbeddingResult {
            embeddings: response.embeddings,
            model: self.model.clone(),
            dimensions,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic unit vectors derived from SHA-256 of the text. Identical
/// strings get identical vectors; anything else is effectively random.
#[derive(Clone)]
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dims);
        let mut block: u32 = 0;
        while values.len() < self.dims {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update(text.as_bytes())
                .finalize();
            for word in digest.chunks_exact(4) {
                if values.len() == self.dims {
                    break;
                }
                let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                values.push(raw as f32 / u32::MAX as f32 * 2.0 - 1.0);
            }
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult {
            embeddings: texts.iter().map(|text| self.vector_for(text)).collect(),
            model: "stub".to_string(),
            dimensions: self.dims,
        })
    }

    fn model_id(&self) -> &str {
        "stub"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn is_semantic(&self) -> bool {
        false
    }
}
