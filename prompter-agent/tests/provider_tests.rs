// ABOUTME: Tests for the MockProvider builder and the ProviderRegistry.
// ABOUTME: Validates expectation matching and runtime provider selection.

use futures::StreamExt;
use prompter_agent::backends::mock::MockProvider;
use prompter_agent::{AiProvider, ProviderError, ProviderRegistry, SessionSpec};
use serde_json::json;

async fn collect(provider: &MockProvider, session_id: &str, text: &str) -> Vec<Result<String, ProviderError>> {
    provider
        .stream_reply(session_id, text)
        .await
        .unwrap()
        .collect()
        .await
}

#[tokio::test]
async fn test_mock_matches_out_of_order_prompts() {
    let mock = MockProvider::new()
        .on_prompt("first")
        .respond_text("one")
        .on_prompt("second")
        .respond_text("two");
    let session_id = mock.open_session(&SessionSpec::new("m")).await.unwrap();

    assert_eq!(collect(&mock, &session_id, "second").await, vec![Ok("two".to_string())]);
    assert_eq!(collect(&mock, &session_id, "first").await, vec![Ok("one".to_string())]);
    assert_eq!(mock.pending_expectations(), 0);
}

#[tokio::test]
async fn test_mock_unmatched_prompt_gets_placeholder() {
    let mock = MockProvider::new();
    let session_id = mock.open_session(&SessionSpec::new("m")).await.unwrap();

    let items = collect(&mock, &session_id, "anything").await;
    assert_eq!(
        items,
        vec![Ok("Mock: no expectation for 'anything'".to_string())]
    );
}

#[tokio::test]
async fn test_mock_rejects_unknown_session() {
    let mock = MockProvider::new();
    let result = mock.stream_reply("nope", "hi").await;
    assert!(matches!(result, Err(ProviderError::UnknownSession(_))));
}

#[tokio::test]
async fn test_mock_records_session_specs() {
    let mock = MockProvider::new();
    mock.open_session(&SessionSpec::new("m").with_system_instruction("be brief"))
        .await
        .unwrap();
    let opened = mock.opened_sessions();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].system_instruction.as_deref(), Some("be brief"));
}

#[tokio::test]
async fn test_registry_creates_mock_provider_with_reply() {
    let registry = ProviderRegistry::default();
    let provider = registry.create("mock", &json!({"reply": "canned"})).unwrap();
    assert_eq!(provider.name(), "mock");

    let session_id = provider.open_session(&SessionSpec::new("m")).await.unwrap();
    let items: Vec<_> = provider
        .stream_reply(&session_id, "whatever")
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items, vec![Ok("canned".to_string())]);
}

#[test]
fn test_registry_lists_available_providers() {
    let registry = ProviderRegistry::default();
    assert_eq!(registry.available(), vec!["gemini", "mock"]);
}

#[test]
fn test_registry_unknown_provider_errors() {
    let registry = ProviderRegistry::default();
    match registry.create("nonexistent", &json!({})) {
        Err(err) => {
            let message = err.to_string();
            assert!(message.contains("Unknown provider: nonexistent"));
            assert!(message.contains("available: gemini, mock"));
        }
        Ok(_) => panic!("Expected error for unknown provider"),
    }
}

#[test]
fn test_registry_custom_factory() {
    use prompter_agent::ProviderFactory;
    use std::sync::Arc;

    let factory: ProviderFactory = Box::new(|_config| Ok(Arc::new(MockProvider::new()) as Arc<dyn AiProvider>));
    let registry = ProviderRegistry::new().register("custom", factory);
    let provider = registry.create("custom", &json!({})).unwrap();
    assert_eq!(provider.name(), "mock");
}

#[tokio::test]
async fn test_registry_creates_from_settings() {
    let registry = ProviderRegistry::default();
    let provider = registry
        .create_from_settings(&json!({"provider": "mock", "reply": "from settings"}))
        .unwrap();
    assert_eq!(provider.name(), "mock");

    let session_id = provider.open_session(&SessionSpec::new("m")).await.unwrap();
    let items: Vec<_> = provider
        .stream_reply(&session_id, "anything")
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items, vec![Ok("from settings".to_string())]);
}

#[test]
fn test_registry_settings_without_provider_name() {
    let registry = ProviderRegistry::default();
    match registry.create_from_settings(&json!({"api_key": "k"})) {
        Err(err) => assert!(err.to_string().contains("missing 'provider'")),
        Ok(_) => panic!("Expected error without a provider name"),
    }
}
