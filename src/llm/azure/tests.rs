use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> LlmConfig {
    LlmConfig {
        endpoint: server.uri(),
        deployment: "gpt-4o".to_string(),
        api_version: "2024-06-01".to_string(),
        api_key_env: "KNOWLEDGE_CHAT_UNSET_TEST_KEY".to_string(),
        ..LlmConfig::default()
    }
}

fn prompt() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a concise assistant."),
        ChatMessage::user("What are the opening hours?"),
    ]
}

#[test]
fn builds_deployment_url() {
    let config = LlmConfig {
        endpoint: "https://corp.openai.azure.com".to_string(),
        deployment: "gpt-4o-mini".to_string(),
        api_version: "2024-06-01".to_string(),
        ..LlmConfig::default()
    };
    let client = AzureOpenAiClient::new(&config).expect("client should build");

    assert_eq!(
        client.completions_url().as_str(),
        "https://corp.openai.azure.com/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-06-01"
    );
}

#[test]
fn debug_output_hides_key() {
    let config = LlmConfig::default();
    let client = AzureOpenAiClient::new(&config)
        .expect("client should build")
        .with_api_key("super-secret");

    assert!(client.has_api_key());
    assert!(!format!("{client:?}").contains("super-secret"));
}

#[test]
fn roles_serialize_lowercase() {
    let message = ChatMessage::assistant("Hi");
    let value = serde_json::to_value(&message).expect("message should serialize");
    assert_eq!(value, json!({ "role": "assistant", "content": "Hi" }));
}

#[tokio::test(flavor = "multi_thread")]
async fn returns_first_choice_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", "2024-06-01"))
        .and(header("api-key", "test-key"))
        .and(body_partial_json(json!({
            "temperature": 0.7,
            "messages": [
                { "role": "system", "content": "You are a concise assistant." },
                { "role": "user", "content": "What are the opening hours?" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "Nine to five." } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config_for(&server))
        .expect("client should build")
        .with_api_key("test-key");

    let answer = client.complete(&prompt()).await.expect("completion should succeed");
    assert_eq!(answer, "Nine to five.");
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_is_generation_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": "429", "message": "Rate limit exceeded" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config_for(&server))
        .expect("client should build")
        .with_api_key("test-key");

    let error = client
        .complete(&prompt())
        .await
        .expect_err("rate limit should fail");
    assert_eq!(error.kind(), "generation_failed");
    assert!(error.to_string().contains("Rate limit exceeded"));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_or_malformed_reply_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "role": "assistant", "content": null } } ]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config_for(&server))
        .expect("client should build")
        .with_api_key("test-key");

    let empty = client.complete(&prompt()).await.expect_err("null content should fail");
    assert!(matches!(empty, KnowledgeError::GenerationFailed(_)));

    let malformed = client.complete(&prompt()).await.expect_err("bad json should fail");
    assert!(malformed.to_string().contains("Malformed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_key_fails_without_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config_for(&server)).expect("client should build");
    assert!(!client.has_api_key());

    let error = client.complete(&prompt()).await.expect_err("missing key should fail");
    assert!(error.to_string().contains("KNOWLEDGE_CHAT_UNSET_TEST_KEY"));
}
