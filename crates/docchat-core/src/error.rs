use docchat_memory::{ChunkError, EmbeddingError};
use docchat_provider::ProviderError;
use docchat_schema::SessionId;
use thiserror::Error;

/// Why a document could not be turned into a searchable index.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("text extraction failed: {0:#}")]
    Extraction(#[source] anyhow::Error),
    #[error("document contains no extractable text")]
    EmptyInput,
    #[error(transparent)]
    Chunking(#[from] ChunkError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("ingest failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("no document has been loaded into this session")]
    NoDocument,
    #[error("question is empty")]
    EmptyQuestion,
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] EmbeddingError),
    #[error("generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),
}

impl SessionError {
    /// Whether the same call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Generation(err) => err
                .chain()
                .find_map(|cause| cause.downcast_ref::<ProviderError>())
                .map(ProviderError::is_retryable)
                .unwrap_or(false),
            Self::Retrieval(EmbeddingError::Provider(err))
            | Self::Ingest(IngestError::Embedding(EmbeddingError::Provider(err))) => {
                is_transient_http(err)
            }
            _ => false,
        }
    }
}

fn is_transient_http(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .map(|e| {
            e.is_timeout()
                || e.is_connect()
                || e.status()
                    .map(|s| s.is_server_error() || s.as_u16() == 429)
                    .unwrap_or(false)
        })
        .unwrap_or(false)
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("session is busy: {0}")]
    SessionBusy(SessionId),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl HostError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SessionBusy(_) => true,
            Self::Session(err) => err.is_retryable(),
            Self::SessionNotFound(_) => false,
        }
    }
}
