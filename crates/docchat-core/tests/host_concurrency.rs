use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use docchat_core::*;
use docchat_memory::{ChunkerConfig, DistanceMetric, StubEmbeddingProvider};
use docchat_provider::{LlmProvider, LlmRequest, LlmResponse};
use docchat_schema::{Document, SessionId};

/// Sleeps inside every call and tracks the peak number of calls in flight.
#[derive(Default)]
struct SlowLlm {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl LlmProvider for SlowLlm {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let question = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(LlmResponse {
            text: format!("re: {question}"),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}

fn engine(llm: Arc<SlowLlm>) -> ChatEngine {
    let settings = EngineSettings {
        chunker: ChunkerConfig::new(50, 10),
        top_k: 2,
        distance: DistanceMetric::Cosine,
        batch_size: 8,
        model: "slow".into(),
        max_tokens: 64,
        system_prompt: None,
        condense_question: false,
    };
    ChatEngine::new(settings, llm, Arc::new(StubEmbeddingProvider::new(16))).unwrap()
}

async fn host_with_sessions(host: &SessionHost, names: &[&str]) -> Vec<SessionId> {
    let mut ids = Vec::new();
    for name in names {
        let id = SessionId::from(*name);
        host.open(id.clone()).await;
        host.ingest_document(
            &id,
            Document::new(
                format!("{name}.txt"),
                "Sleep hygiene means a regular schedule, a dark room and no screens before bed.",
            ),
        )
        .await
        .unwrap();
        ids.push(id);
    }
    ids
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let host = SessionHost::new(engine(Arc::new(SlowLlm::default())));
    let err = host
        .ask(&SessionId::from("missing"), "hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::SessionNotFound(_)));
}

#[tokio::test]
async fn same_session_requests_are_serialized() {
    let llm = Arc::new(SlowLlm::default());
    let host = SessionHost::new(engine(llm.clone()));
    let ids = host_with_sessions(&host, &["one"]).await;

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let host = host.clone();
            let id = ids[0].clone();
            tokio::spawn(async move { host.ask(&id, &format!("question {i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(llm.peak.load(Ordering::SeqCst), 1);
    let history = host.history(&ids[0]).await.unwrap();
    assert_eq!(history.len(), 6);
    // Every user turn is directly followed by its own answer.
    for pair in history.chunks(2) {
        assert_eq!(pair[1].text, format!("re: {}", pair[0].text));
    }
}

#[tokio::test]
async fn different_sessions_run_in_parallel() {
    let llm = Arc::new(SlowLlm::default());
    let host = SessionHost::new(engine(llm.clone()));
    let ids = host_with_sessions(&host, &["a", "b"]).await;

    let (first, second) = tokio::join!(host.ask(&ids[0], "x"), host.ask(&ids[1], "y"));
    first.unwrap();
    second.unwrap();

    assert_eq!(llm.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn global_limit_bounds_all_sessions() {
    let llm = Arc::new(SlowLlm::default());
    let host = SessionHost::with_global_limit(engine(llm.clone()), 1);
    let ids = host_with_sessions(&host, &["a", "b", "c"]).await;

    let (a, b, c) = tokio::join!(
        host.ask(&ids[0], "x"),
        host.ask(&ids[1], "y"),
        host.ask(&ids[2], "z")
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(llm.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn queued_requests_do_not_hold_global_permits() {
    let llm = Arc::new(SlowLlm::default());
    let host = SessionHost::with_global_limit(engine(llm.clone()), 2);
    let ids = host_with_sessions(&host, &["a", "b"]).await;

    let queued: Vec<_> = (0..3)
        .map(|i| {
            let host = host.clone();
            let id = ids[0].clone();
            tokio::spawn(async move { host.ask(&id, &format!("a{i}")).await })
        })
        .collect();
    // Let the first ask on "a" start and the other two queue behind it.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = std::time::Instant::now();
    host.ask(&ids[1], "b").await.unwrap();
    let elapsed = started.elapsed();

    // One 40 ms call, not one after another of "a"'s.
    assert!(elapsed < Duration::from_millis(75), "took {elapsed:?}");

    for handle in queued {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(llm.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn try_ask_fails_fast_when_busy() {
    let llm = Arc::new(SlowLlm::default());
    let host = SessionHost::new(engine(llm.clone()));
    let ids = host_with_sessions(&host, &["busy"]).await;

    let running = {
        let host = host.clone();
        let id = ids[0].clone();
        tokio::spawn(async move { host.ask(&id, "long one").await })
    };
    // Give the spawned ask time to take the lock.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = host.try_ask(&ids[0], "impatient").await.unwrap_err();
    assert!(matches!(err, HostError::SessionBusy(_)));
    assert!(err.is_retryable());

    running.await.unwrap().unwrap();
    assert_eq!(host.history(&ids[0]).await.unwrap().len(), 2);

    host.try_ask(&ids[0], "now free").await.unwrap();
}

#[tokio::test]
async fn create_list_snapshot_remove() {
    let host = SessionHost::new(engine(Arc::new(SlowLlm::default())));
    let generated = host.create().await;
    let ids = host_with_sessions(&host, &["named"]).await;

    let listed = host.list().await;
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&generated));

    let snapshot = host.snapshot(&generated).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Empty);

    host.ask(&ids[0], "hi").await.unwrap();
    let snapshot = host.snapshot(&ids[0]).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Active);
    assert_eq!(snapshot.turns, 2);
    assert_eq!(snapshot.document_source.as_deref(), Some("named.txt"));

    host.reset(&ids[0]).await.unwrap();
    assert_eq!(host.snapshot(&ids[0]).await.unwrap().state, SessionState::Ready);

    assert!(host.remove(&ids[0]).await);
    assert!(!host.remove(&ids[0]).await);
    assert!(!host.contains(&ids[0]).await);
    assert!(matches!(
        host.snapshot(&ids[0]).await.unwrap_err(),
        HostError::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn empty_session_ask_through_host_is_no_document() {
    let host = SessionHost::new(engine(Arc::new(SlowLlm::default())));
    let id = host.create().await;
    let err = host.ask(&id, "anything").await.unwrap_err();
    assert!(matches!(err, HostError::Session(SessionError::NoDocument)));
}
