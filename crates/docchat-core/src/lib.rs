pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod ingest;
pub mod prompt;
pub mod session;

pub use config::{
    load_config, resolve_env_var, validate_config, DocchatConfig, EmbeddingConfig,
    EmbeddingProviderKind, LlmConfig,
};
pub use engine::{Answer, ChatEngine, EngineSettings};
pub use error::{HostError, IngestError, SessionError};
pub use host::SessionHost;
pub use ingest::{AutoExtractor, DocumentExtractor, PdfExtractor, PlainTextExtractor};
pub use session::{Session, SessionState, SessionSummary};
