use std::sync::Arc;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::index::{RetrievedChunk, VectorIndex};

pub const DEFAULT_TOP_K: usize = 4;

/// Embeds a query and pulls the closest chunks out of an index.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, top_k: usize) -> Self {
        Self { embedder, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>, EmbeddingError> {
        if index.is_empty() || self.top_k == 0 {
            return Ok(Vec::new());
        }
        if index.model() != self.embedder.model_id() {
            return Err(EmbeddingError::ModelMismatch {
                index_model: index.model().to_string(),
                provider_model: self.embedder.model_id().to_string(),
            });
        }

        let result = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(EmbeddingError::Provider)?;
        let query_vec = match result.embeddings.into_iter().next() {
            Some(v) => v,
            None => return Err(EmbeddingError::CountMismatch { expected: 1, got: 0 }),
        };

        let hits = index.search(&query_vec, self.top_k)?;
        tracing::debug!(
            top_k = self.top_k,
            hits = hits.len(),
            best = hits.first().map(|h| h.distance),
            "retrieved context"
        );
        Ok(hits)
    }
}
