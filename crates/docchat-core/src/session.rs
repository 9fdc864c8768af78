use docchat_memory::VectorIndex;
use docchat_schema::{SessionId, Turn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No index loaded.
    Empty,
    /// Index loaded, no turns yet.
    Ready,
    /// Index loaded and at least one turn.
    Active,
}

/// One conversation over one document.
///
/// Holds at most one index. The engine mutates a session only after an
/// operation has fully succeeded, except for ingest which clears it first.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    document_source: Option<String>,
    index: Option<VectorIndex>,
    turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            document_source: None,
            index: None,
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        match (&self.index, self.turns.is_empty()) {
            (None, _) => SessionState::Empty,
            (Some(_), true) => SessionState::Ready,
            (Some(_), false) => SessionState::Active,
        }
    }

    pub fn document_source(&self) -> Option<&str> {
        self.document_source.as_deref()
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Drop history, keep the document.
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// Drop history and document.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.index = None;
        self.document_source = None;
    }

    pub(crate) fn install(&mut self, source: String, index: VectorIndex) {
        self.turns.clear();
        self.document_source = Some(source);
        self.index = Some(index);
    }

    pub(crate) fn record_exchange(&mut self, question: Turn, answer: Turn) {
        self.turns.push(question);
        self.turns.push(answer);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            state: self.state(),
            document_source: self.document_source.clone(),
            chunks: self.index.as_ref().map(VectorIndex::len).unwrap_or(0),
            turns: self.turns.len(),
        }
    }
}

/// Point-in-time view of a session for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub state: SessionState,
    pub document_source: Option<String>,
    pub chunks: usize,
    pub turns: usize,
}
