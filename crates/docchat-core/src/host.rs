//! Many sessions behind one engine, with per-session mutual exclusion.
//!
//! Operations on the same session run one at a time in arrival order;
//! operations on different sessions run in parallel, optionally bounded by a
//! global limit.

use std::collections::HashMap;
use std::sync::Arc;

use docchat_schema::{Document, SessionId, Turn};
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::engine::{Answer, ChatEngine};
use crate::error::HostError;
use crate::session::{Session, SessionSummary};

type SessionSlot = Arc<Mutex<Session>>;

#[derive(Clone)]
pub struct SessionHost {
    engine: Arc<ChatEngine>,
    sessions: Arc<Mutex<HashMap<SessionId, SessionSlot>>>,
    /// Optional concurrency limit across all sessions
    global_semaphore: Option<Arc<Semaphore>>,
}

/// Exclusive access to one session; released on drop.
struct SessionGuard {
    session: OwnedMutexGuard<Session>,
    _global_permit: Option<OwnedSemaphorePermit>,
}

impl SessionHost {
    pub fn new(engine: ChatEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            global_semaphore: None,
        }
    }

    pub fn with_global_limit(engine: ChatEngine, max_concurrent: usize) -> Self {
        Self {
            global_semaphore: Some(Arc::new(Semaphore::new(max_concurrent.max(1)))),
            ..Self::new(engine)
        }
    }

    pub fn engine(&self) -> &ChatEngine {
        &self.engine
    }

    /// Start a new empty session under a fresh id.
    pub async fn create(&self) -> SessionId {
        let id = SessionId::generate();
        self.open(id.clone()).await;
        id
    }

    /// Get-or-create the session stored under `id`.
    pub async fn open(&self, id: SessionId) {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id))));
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    pub async fn list(&self) -> Vec<SessionId> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<SessionId> = sessions.keys().cloned().collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }

    /// Forget a session. An operation already running on it finishes first.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let slot = self.sessions.lock().await.remove(id);
        match slot {
            Some(slot) => {
                drop(slot.lock().await);
                tracing::debug!(session = %id, "session removed");
                true
            }
            None => false,
        }
    }

    pub async fn ingest(
        &self,
        id: &SessionId,
        source: &str,
        bytes: Vec<u8>,
    ) -> Result<(), HostError> {
        let mut guard = self.acquire(id).await?;
        self.engine.ingest(&mut guard.session, source, bytes).await?;
        Ok(())
    }

    pub async fn ingest_document(&self, id: &SessionId, document: Document) -> Result<(), HostError> {
        let mut guard = self.acquire(id).await?;
        self.engine
            .ingest_document(&mut guard.session, document)
            .await?;
        Ok(())
    }

    /// Waits for any operation already running on this session.
    pub async fn ask(&self, id: &SessionId, question: &str) -> Result<Answer, HostError> {
        let mut guard = self.acquire(id).await?;
        Ok(self.engine.ask(&mut guard.session, question).await?)
    }

    /// Like [`Self::ask`] but fails with `SessionBusy` instead of waiting.
    pub async fn try_ask(&self, id: &SessionId, question: &str) -> Result<Answer, HostError> {
        let mut guard = self.try_acquire(id).await?;
        Ok(self.engine.ask(&mut guard.session, question).await?)
    }

    pub async fn reset(&self, id: &SessionId) -> Result<(), HostError> {
        let mut guard = self.acquire(id).await?;
        guard.session.reset();
        Ok(())
    }

    pub async fn history(&self, id: &SessionId) -> Result<Vec<Turn>, HostError> {
        let guard = self.acquire(id).await?;
        Ok(guard.session.turns().to_vec())
    }

    pub async fn snapshot(&self, id: &SessionId) -> Result<SessionSummary, HostError> {
        let guard = self.acquire(id).await?;
        Ok(guard.session.summary())
    }

    async fn slot(&self, id: &SessionId) -> Result<SessionSlot, HostError> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| HostError::SessionNotFound(id.clone()))
    }

    async fn acquire(&self, id: &SessionId) -> Result<SessionGuard, HostError> {
        let slot = self.slot(id).await?;

        // Session lock before the global permit: a request queued behind its
        // own session must not hold a permit other sessions could use.
        let session = slot.lock_owned().await;
        let global_permit = match &self.global_semaphore {
            // The semaphore is never closed, so acquire only fails if it is.
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        };

        Ok(SessionGuard {
            session,
            _global_permit: global_permit,
        })
    }

    async fn try_acquire(&self, id: &SessionId) -> Result<SessionGuard, HostError> {
        let slot = self.slot(id).await?;

        let session = slot
            .try_lock_owned()
            .map_err(|_| HostError::SessionBusy(id.clone()))?;
        let global_permit = match &self.global_semaphore {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(HostError::SessionBusy(id.clone())),
            },
            None => None,
        };

        Ok(SessionGuard {
            session,
            _global_permit: global_permit,
        })
    }
}
