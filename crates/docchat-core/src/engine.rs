use std::sync::Arc;

use anyhow::{anyhow, Context};
use docchat_memory::{
    ChunkError, Chunker, ChunkerConfig, DistanceMetric, EmbeddingProvider, RetrievedChunk,
    Retriever, VectorIndex,
};
use docchat_provider::{LlmMessage, LlmProvider, LlmRequest};
use docchat_schema::{Chunk, Document, Turn};
use tokio::task;

use crate::config::DocchatConfig;
use crate::error::{IngestError, SessionError};
use crate::ingest::{AutoExtractor, DocumentExtractor};
use crate::prompt;
use crate::session::Session;

/// Everything the engine needs from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunker: ChunkerConfig,
    pub top_k: usize,
    pub distance: DistanceMetric,
    pub batch_size: usize,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub condense_question: bool,
}

impl From<&DocchatConfig> for EngineSettings {
    fn from(config: &DocchatConfig) -> Self {
        Self {
            chunker: config.chunker(),
            top_k: config.top_k,
            distance: config.distance,
            batch_size: config.embedding.batch_size,
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            system_prompt: config.llm.system_prompt.clone(),
            condense_question: config.condense_question,
        }
    }
}

/// Reply to one question together with the passages it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

/// Runs ingest and ask against a caller-owned [`Session`].
///
/// Holds no per-session state, so one engine serves any number of sessions.
#[derive(Clone)]
pub struct ChatEngine {
    settings: EngineSettings,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Retriever,
    llm: Arc<dyn LlmProvider>,
    extractor: Arc<dyn DocumentExtractor>,
}

impl ChatEngine {
    pub fn new(
        settings: EngineSettings,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ChunkError> {
        let chunker = Chunker::new(settings.chunker)?;
        let retriever = Retriever::new(Arc::clone(&embedder), settings.top_k);
        Ok(Self {
            settings,
            chunker,
            embedder,
            retriever,
            llm,
            extractor: Arc::new(AutoExtractor::default()),
        })
    }

    pub fn from_config(config: &DocchatConfig) -> anyhow::Result<Self> {
        let llm = config.build_llm()?;
        let embedder = config.build_embedder()?;
        if !embedder.is_semantic() {
            tracing::warn!(
                model = embedder.model_id(),
                "embedding provider is not semantic; retrieved passages will not match meaning"
            );
        }
        Ok(Self::new(EngineSettings::from(config), llm, embedder)?)
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Ask the language model endpoint whether it is reachable with the
    /// configured credentials. Makes no chat call.
    pub async fn check_llm(&self) -> anyhow::Result<()> {
        self.llm
            .health()
            .await
            .context("language model endpoint check failed")
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Extract text from raw bytes and index it. See [`Self::ingest_document`].
    pub async fn ingest(
        &self,
        session: &mut Session,
        source: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SessionError> {
        // Cleared before extraction so an unreadable file also leaves it `Empty`.
        session.clear();

        let extractor = Arc::clone(&self.extractor);
        let text = task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|err| IngestError::Extraction(anyhow!("extraction task failed: {err}")))?
            .map_err(IngestError::Extraction)?;

        self.index_into(session, Document::new(source, text)).await
    }

    /// Replace whatever the session held with an index over `document`.
    ///
    /// The session is cleared up front, so on failure it is left `Empty`.
    pub async fn ingest_document(
        &self,
        session: &mut Session,
        document: Document,
    ) -> Result<(), SessionError> {
        session.clear();
        self.index_into(session, document).await
    }

    /// Chunk, embed and install `document`. Expects an already cleared session.
    async fn index_into(
        &self,
        session: &mut Session,
        document: Document,
    ) -> Result<(), SessionError> {
        if document.text.trim().is_empty() {
            return Err(IngestError::EmptyInput.into());
        }

        let chunks: Vec<Chunk> = self
            .chunker
            .chunks(&document.text)
            .map_err(IngestError::from)?
            .collect();
        let chunk_count = chunks.len();

        let index = VectorIndex::build(
            chunks,
            self.embedder.as_ref(),
            self.settings.distance,
            self.settings.batch_size,
        )
        .await
        .map_err(IngestError::from)?;

        tracing::info!(
            session = %session.id(),
            source = %document.source,
            chars = document.text.chars().count(),
            chunks = chunk_count,
            "document ingested"
        );
        session.install(document.source, index);
        Ok(())
    }

    /// Answer `question` from the session's document and record the exchange.
    ///
    /// Two turns are appended on success and none on failure.
    pub async fn ask(&self, session: &mut Session, question: &str) -> Result<Answer, SessionError> {
        let index = session.index().ok_or(SessionError::NoDocument)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let standalone = if self.settings.condense_question && !session.turns().is_empty() {
            self.condense(session.turns(), question).await?
        } else {
            question.to_string()
        };

        let sources = self
            .retriever
            .retrieve(index, &standalone)
            .await
            .map_err(SessionError::Retrieval)?;

        let request = LlmRequest {
            model: self.settings.model.clone(),
            system: Some(prompt::build_system_prompt(
                self.settings.system_prompt.as_deref(),
                &sources,
            )),
            messages: prompt::answer_messages(session.turns(), &standalone),
            max_tokens: self.settings.max_tokens,
            temperature: None,
        };
        let response = self
            .llm
            .chat(request)
            .await
            .map_err(SessionError::Generation)?;

        session.record_exchange(Turn::user(question), Turn::assistant(response.text.clone()));
        tracing::info!(
            session = %session.id(),
            sources = sources.len(),
            turns = session.turns().len(),
            output_tokens = response.output_tokens,
            "question answered"
        );

        Ok(Answer {
            text: response.text,
            sources,
        })
    }

    async fn condense(&self, turns: &[Turn], question: &str) -> Result<String, SessionError> {
        let (system, user) = prompt::condense_prompt(turns, question);
        let request = LlmRequest {
            model: self.settings.model.clone(),
            system: Some(system),
            messages: vec![LlmMessage::user(user)],
            max_tokens: self.settings.max_tokens,
            temperature: Some(0.0),
        };
        let response = self
            .llm
            .chat(request)
            .await
            .map_err(SessionError::Generation)?;

        let rewritten = response.text.trim();
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }
        tracing::debug!(original = question, rewritten, "condensed follow-up question");
        Ok(rewritten.to_string())
    }
}
