use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> OllamaConfig {
    let url = Url::parse(&server.uri()).expect("mock server uri should parse");
    OllamaConfig {
        host: url.host_str().expect("mock server has a host").to_string(),
        port: url.port().expect("mock server has a port"),
        embedding_model: "all-minilm".to_string(),
        batch_size: 2,
        embedding_dimension: 64,
        ..OllamaConfig::default()
    }
}

fn test_client(server: &MockServer) -> OllamaClient {
    OllamaClient::new(&config_for(server))
        .expect("Failed to create client")
        .with_backoff(Duration::ZERO)
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        embedding_model: "test-model".to_string(),
        batch_size: 128,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.dimension, 384);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5)
        .with_backoff(Duration::ZERO);

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.backoff_base, Duration::ZERO);
}

#[test]
fn latest_tag_matching() {
    assert!(model_matches("all-minilm:latest", "all-minilm"));
    assert!(model_matches("all-minilm", "all-minilm:latest"));
    assert!(model_matches("llama3.2:3b", "llama3.2:3b"));
    assert!(!model_matches("llama3.2:3b", "llama3.2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn single_embedding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({
            "model": "all-minilm",
            "input": ["Who is Rick Grimes?"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "all-minilm",
            "embeddings": [vec![0.25_f32; 64]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let vector = client
        .embed_query("Who is Rick Grimes?")
        .expect("should embed query");

    assert_eq!(vector.len(), 64);
    assert!(vector.iter().all(|v| (*v - 0.25).abs() < f32::EPSILON));
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_dimension_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [vec![0.1_f32; 128]]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .embed_query("query")
        .expect_err("128 dimensions should be rejected");

    assert!(matches!(
        err,
        SearchError::DimensionMismatch {
            expected: 64,
            actual: 128
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_is_split_by_batch_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["a", "b"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [vec![1.0_f32; 64], vec![2.0_f32; 64]]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["c"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [vec![3.0_f32; 64]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = client
        .generate_embeddings_batch(&texts)
        .expect("should embed batch");

    assert_eq!(vectors.len(), 3);
    assert!((vectors[2][0] - 3.0).abs() < f32::EPSILON);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [vec![0.5_f32; 64]]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let vector = client
        .generate_embedding("retry me")
        .expect("second attempt should succeed");
    assert_eq!(vector.len(), 64);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_model_fails_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "nomic-embed-text:latest" }]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    assert!(client.health_check().is_err());

    let models = client.list_models().expect("should list models");
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "nomic-embed-text:latest");
}

#[tokio::test(flavor = "multi_thread")]
async fn available_model_passes_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "all-minilm:latest", "size": 45_960_996 }]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    assert!(client.health_check().is_ok());
}
