pub mod chunker;
pub mod embedding;
pub mod index;
pub mod retriever;

pub use chunker::{reassemble, ChunkError, Chunker, ChunkerConfig, Chunks};
pub use embedding::{
    EmbeddingError, EmbeddingProvider, EmbeddingResult, OllamaEmbeddingProvider,
    OpenAiEmbeddingProvider, StubEmbeddingProvider, DEFAULT_EMBEDDING_TIMEOUT,
};
pub use index::{DistanceMetric, IndexEntry, RetrievedChunk, VectorIndex};
pub use retriever::{Retriever, DEFAULT_TOP_K};
