use docchat_schema::Chunk;
use serde::{Deserialize, Serialize};

use crate::embedding::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`; a zero vector is treated as maximally distant.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk returned by a search, with its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// In-memory exact-search index over one document's chunks.
///
/// Every chunk has exactly one vector, all vectors share one dimension, and
/// all come from the same embedding model.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    metric: DistanceMetric,
    model: String,
    dimensions: usize,
}

impl VectorIndex {
    /// Embed every chunk and build the index. Nothing is returned unless all
    /// batches succeed.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        metric: DistanceMetric,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let batch_size = batch_size.max(1);
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        let mut dimensions = embedder.dimensions();

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let result = embedder
                .embed(&texts)
                .await
                .map_err(EmbeddingError::Provider)?;

            if result.embeddings.len() != texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    got: result.embeddings.len(),
                });
            }
            if embeddings.is_empty() {
                if let Some(first) = result.embeddings.first() {
                    dimensions = first.len();
                }
            }
            if let Some(bad) = result.embeddings.iter().find(|e| e.len() != dimensions) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    got: bad.len(),
                });
            }
            embeddings.extend(result.embeddings);
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        tracing::info!(
            chunks = entries.len(),
            model = embedder.model_id(),
            dimensions,
            "built vector index"
        );

        Ok(Self {
            entries,
            metric,
            model: embedder.model_id().to_string(),
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The `k` nearest chunks, closest first. Ties keep document order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, EmbeddingError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<RetrievedChunk> = self
            .entries
            .iter()
            .map(|entry| RetrievedChunk {
                chunk: entry.chunk.clone(),
                distance: self.metric.distance(query, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.chunk.index.cmp(&b.chunk.index))
        });
        scored.truncate(k);
        Ok(scored)
    }
}
