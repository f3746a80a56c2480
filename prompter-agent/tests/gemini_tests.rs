// ABOUTME: HTTP-level tests for the Gemini provider using a wiremock server.
// ABOUTME: Verifies SSE streaming, status classification, and conversation history.

use futures::StreamExt;
use prompter_agent::backends::gemini::GeminiProvider;
use prompter_agent::{AiProvider, ProviderError, SessionSpec};
use serde_json::Value;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/v1beta/models/gemini-test:streamGenerateContent";

fn sse_body(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| {
            format!(
                "data: {{\"candidates\":[{{\"content\":{{\"role\":\"model\",\"parts\":[{{\"text\":{}}}]}}}}]}}\r\n\r\n",
                serde_json::to_string(p).unwrap()
            )
        })
        .collect()
}

async fn reply_text(provider: &GeminiProvider, session_id: &str, text: &str) -> Result<String, ProviderError> {
    let mut stream = provider.stream_reply(session_id, text).await?;
    let mut out = String::new();
    while let Some(item) = stream.next().await {
        out.push_str(&item?);
    }
    Ok(out)
}

#[tokio::test]
async fn test_streams_text_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["Hello", " chat"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let provider = GeminiProvider::with_base_url("test-key", server.uri());
    let session_id = provider
        .open_session(&SessionSpec::new("gemini-test").with_system_instruction("Be kind"))
        .await
        .unwrap();

    let text = reply_text(&provider, &session_id, "bob says: hi").await.unwrap();
    assert_eq!(text, "Hello chat");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be kind");
    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "bob says: hi");
}

#[tokio::test]
async fn test_history_carries_previous_turns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&["ok"]), "text/event-stream"))
        .mount(&server)
        .await;

    let provider = GeminiProvider::with_base_url("test-key", server.uri());
    let session_id = provider.open_session(&SessionSpec::new("gemini-test")).await.unwrap();

    reply_text(&provider, &session_id, "first").await.unwrap();
    reply_text(&provider, &session_id, "second").await.unwrap();
    assert_eq!(provider.history_len(&session_id), Some(4));

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[1]["parts"][0]["text"], "ok");
    assert_eq!(contents[2]["parts"][0]["text"], "second");
}

#[tokio::test]
async fn test_history_is_capped_to_recent_exchanges() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&["ok"]), "text/event-stream"))
        .mount(&server)
        .await;

    let provider = GeminiProvider::with_base_url("test-key", server.uri()).with_max_history_turns(2);
    let session_id = provider.open_session(&SessionSpec::new("gemini-test")).await.unwrap();

    for prompt in ["first", "second", "third"] {
        reply_text(&provider, &session_id, prompt).await.unwrap();
    }
    assert_eq!(provider.history_len(&session_id), Some(4));

    reply_text(&provider, &session_id, "fourth").await.unwrap();
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[3].body).unwrap();
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 5);
    assert_eq!(contents[0]["parts"][0]["text"], "second");
    assert_eq!(contents[4]["parts"][0]["text"], "fourth");
}

#[tokio::test]
async fn test_factory_reads_history_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&["ok"]), "text/event-stream"))
        .mount(&server)
        .await;

    let factory = GeminiProvider::factory();
    let provider = factory(&serde_json::json!({
        "api_key": "test-key",
        "base_url": server.uri(),
        "max_history_turns": 1,
    }))
    .unwrap();
    let session_id = provider.open_session(&SessionSpec::new("gemini-test")).await.unwrap();

    for prompt in ["first", "second", "third"] {
        let mut stream = provider.stream_reply(&session_id, prompt).await.unwrap();
        while stream.next().await.is_some() {}
    }

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[2].body).unwrap();
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["parts"][0]["text"], "second");
}

#[tokio::test]
async fn test_rate_limit_status_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let provider = GeminiProvider::with_base_url("test-key", server.uri());
    let session_id = provider.open_session(&SessionSpec::new("gemini-test")).await.unwrap();

    match provider.stream_reply(&session_id, "hi").await {
        Err(ProviderError::RateLimited(body)) => assert_eq!(body, "quota exceeded"),
        Err(other) => panic!("expected RateLimited, got {:?}", other),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_closed_session_is_unknown() {
    let provider = GeminiProvider::with_base_url("test-key", "http://127.0.0.1:9");
    let session_id = provider.open_session(&SessionSpec::new("gemini-test")).await.unwrap();
    provider.close_session(&session_id).await.unwrap();

    assert!(matches!(
        provider.stream_reply(&session_id, "hi").await,
        Err(ProviderError::UnknownSession(_))
    ));
}
