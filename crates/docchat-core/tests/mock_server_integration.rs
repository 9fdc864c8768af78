use docchat_core::*;
use docchat_provider::{ProviderError, ProviderErrorKind, ProviderType};
use docchat_schema::SessionId;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOC: &str = "Aspirin reduces fever and mild pain. It should not be given to children with viral infections.";

fn mock_chat_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "gen-1",
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 42, "completion_tokens": 7}
    })
}

async fn mount_embeddings(server: &MockServer) {
    // Every input, document chunk or query, maps to the same vector.
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "all-minilm",
            "embeddings": [[0.6, 0.8, 0.0]]
        })))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer) -> DocchatConfig {
    let mut config = DocchatConfig::default();
    config.chunk_size = 200;
    config.chunk_overlap = 20;
    config.embedding.provider = EmbeddingProviderKind::Ollama;
    config.embedding.base_url = Some(server.uri());
    config.embedding.dimensions = 3;
    config.llm.provider = ProviderType::OpenRouter;
    config.llm.endpoint = Some(server.uri());
    config.llm.api_key = "sk-or-test".into();
    config.llm.system_prompt = Some("You are SaglikGPT.".into());
    config
}

#[tokio::test]
async fn ask_round_trip_against_mock_endpoints() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-or-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "mistralai/mistral-7b-instruct:free",
            "messages": [
                {"role": "system"},
                {"role": "user", "content": "Can children take aspirin?"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(mock_chat_response("Not during viral infections.")),
        )
        .expect(1)
        .mount(&server)
        .await;

    validate_config(&config_for(&server)).unwrap();
    let engine = ChatEngine::from_config(&config_for(&server)).unwrap();
    let mut session = Session::new(SessionId::from("e2e"));
    engine
        .ingest(&mut session, "aspirin.txt", DOC.as_bytes().to_vec())
        .await
        .unwrap();

    let answer = engine
        .ask(&mut session, "Can children take aspirin?")
        .await
        .unwrap();

    assert_eq!(answer.text, "Not during viral infections.");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].chunk.text, DOC);
    assert_eq!(session.turns().len(), 2);
}

#[tokio::test]
async fn rate_limited_model_is_retryable_generation_error() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "Rate limit exceeded: free-models-per-min", "code": 429}
        })))
        .mount(&server)
        .await;

    let engine = ChatEngine::from_config(&config_for(&server)).unwrap();
    let mut session = Session::new(SessionId::from("e2e"));
    engine
        .ingest(&mut session, "aspirin.txt", DOC.as_bytes().to_vec())
        .await
        .unwrap();

    let err = engine.ask(&mut session, "Dose?").await.unwrap_err();
    assert!(err.is_retryable());
    match &err {
        SessionError::Generation(inner) => {
            let provider_err = inner.downcast_ref::<ProviderError>().unwrap();
            assert_eq!(provider_err.kind, ProviderErrorKind::RateLimit);
        }
        other => panic!("expected generation error, got {other:?}"),
    }
    assert!(session.turns().is_empty());
}

#[tokio::test]
async fn embedding_outage_fails_ingest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let engine = ChatEngine::from_config(&config_for(&server)).unwrap();
    let mut session = Session::new(SessionId::from("e2e"));
    let err = engine
        .ingest(&mut session, "aspirin.txt", DOC.as_bytes().to_vec())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Ingest(IngestError::Embedding(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Empty);
}

#[tokio::test]
async fn stalled_embedding_server_times_out_as_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"embeddings": [[0.6, 0.8, 0.0]]}))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.embedding.timeout_ms = 200;
    let engine = ChatEngine::from_config(&config).unwrap();
    let mut session = Session::new(SessionId::from("e2e"));

    let started = std::time::Instant::now();
    let err = engine
        .ingest(&mut session, "aspirin.txt", DOC.as_bytes().to_vec())
        .await
        .unwrap_err();

    assert!(started.elapsed() < std::time::Duration::from_secs(3));
    assert!(matches!(
        err,
        SessionError::Ingest(IngestError::Embedding(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Empty);
}

#[tokio::test]
async fn endpoint_check_uses_models_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer sk-or-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let engine = ChatEngine::from_config(&config_for(&server)).unwrap();
    engine.check_llm().await.unwrap();
    assert!(engine.embedder().is_semantic());
}

#[tokio::test]
async fn endpoint_check_reports_rejected_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let engine = ChatEngine::from_config(&config_for(&server)).unwrap();
    let err = engine.check_llm().await.unwrap_err();
    assert!(err.to_string().contains("endpoint check failed"));
}
