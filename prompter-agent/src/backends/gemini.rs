// ABOUTME: Gemini provider - streams replies from generativelanguage.googleapis.com over SSE.
// ABOUTME: Keeps per-session conversation history so each prompt carries its context.

use crate::traits::{AiProvider, DeltaStream, ProviderError, SessionSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
/// Exchanges kept per session before the oldest are dropped
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 20;

struct Conversation {
    model: String,
    system_instruction: Option<String>,
    history: Vec<Value>,
}

impl Conversation {
    // History holds user/model pairs; trim whole exchanges from the front
    fn record(&mut self, user_text: &str, reply: &str, max_turns: usize) {
        self.history.push(user_turn(user_text));
        self.history.push(model_turn(reply));
        let excess = self.history.len().saturating_sub(max_turns * 2);
        self.history.drain(..excess);
    }
}

pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    max_history_turns: usize,
    sessions: Arc<Mutex<HashMap<String, Conversation>>>,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("max_history_turns", &self.max_history_turns)
            .finish()
    }
}

fn lock(
    sessions: &Mutex<HashMap<String, Conversation>>,
) -> MutexGuard<'_, HashMap<String, Conversation>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Limit how many past exchanges each request carries
    pub fn with_max_history_turns(mut self, turns: usize) -> Self {
        self.max_history_turns = turns;
        self
    }

    /// Factory function for the registry.
    ///
    /// Requires `"api_key"`; `"base_url"` and `"max_history_turns"` are optional.
    pub fn factory() -> crate::registry::ProviderFactory {
        Box::new(|config| {
            let api_key = config
                .get("api_key")
                .and_then(|v| v.as_str())
                .filter(|k| !k.trim().is_empty())
                .context("gemini provider requires 'api_key'")?;
            let base_url = config
                .get("base_url")
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_BASE_URL);
            let max_history_turns = config
                .get("max_history_turns")
                .and_then(|v| v.as_u64())
                .map_or(DEFAULT_MAX_HISTORY_TURNS, |n| n as usize);
            let provider = GeminiProvider::with_base_url(api_key, base_url)
                .with_max_history_turns(max_history_turns);
            Ok(Arc::new(provider) as Arc<dyn AiProvider>)
        })
    }

    /// Number of history entries recorded for a session, counting user and
    /// model turns separately
    pub fn history_len(&self, session_id: &str) -> Option<usize> {
        lock(&self.sessions).get(session_id).map(|c| c.history.len())
    }

    fn request_body(conversation: &Conversation, text: &str) -> (String, Value) {
        let mut contents = conversation.history.clone();
        contents.push(user_turn(text));

        let mut body = json!({ "contents": contents });
        if let Some(ref instruction) = conversation.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
        }
        (conversation.model.clone(), body)
    }
}

fn user_turn(text: &str) -> Value {
    json!({ "role": "user", "parts": [{ "text": text }] })
}

fn model_turn(text: &str) -> Value {
    json!({ "role": "model", "parts": [{ "text": text }] })
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn open_session(&self, spec: &SessionSpec) -> Result<String> {
        if spec.model.trim().is_empty() {
            anyhow::bail!("gemini session requires a model name");
        }
        let session_id = format!("gemini-{}", uuid::Uuid::new_v4());
        lock(&self.sessions).insert(
            session_id.clone(),
            Conversation {
                model: spec.model.clone(),
                system_instruction: spec.system_instruction.clone(),
                history: Vec::new(),
            },
        );
        tracing::debug!(session_id = %session_id, model = %spec.model, "Gemini session opened");
        Ok(session_id)
    }

    async fn stream_reply(
        &self,
        session_id: &str,
        text: &str,
    ) -> std::result::Result<DeltaStream, ProviderError> {
        let (model, body) = {
            let sessions = lock(&self.sessions);
            let conversation = sessions
                .get(session_id)
                .ok_or_else(|| ProviderError::UnknownSession(session_id.to_string()))?;
            Self::request_body(conversation, text)
        };

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Gemini request rejected");
            return Err(ProviderError::from_status(status.as_u16(), body_text));
        }

        let (tx, rx) = mpsc::channel(64);
        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_string();
        let user_text = text.to_string();
        let max_history_turns = self.max_history_turns;
        let mut byte_stream = resp.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = SseBuffer::default();
            let mut full_text = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Transport(e.to_string()))).await;
                        return;
                    }
                };
                let payloads = match buffer.push(&chunk) {
                    Ok(payloads) => payloads,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                for data in payloads {
                    match parse_sse_data(&data) {
                        Ok(deltas) => {
                            for delta in deltas {
                                full_text.push_str(&delta);
                                if tx.send(Ok(delta)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if let Some(conversation) = lock(&sessions).get_mut(&session_id) {
                conversation.record(&user_text, &full_text, max_history_turns);
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        lock(&self.sessions).remove(session_id);
        tracing::debug!(session_id = %session_id, "Gemini session closed");
        Ok(())
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Network chunks can end in the middle of a multi-byte character, so bytes
/// are held until an event is complete and only then decoded.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    /// Append bytes and return the data payload of every completed event
    pub fn push(&mut self, bytes: &[u8]) -> std::result::Result<Vec<String>, ProviderError> {
        self.buf.extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..pos + 2).collect();
            let block = String::from_utf8(block)
                .map_err(|e| ProviderError::Decode(format!("event is not UTF-8: {}", e)))?;
            let data = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect::<Vec<_>>()
                .join("\n");
            if !data.is_empty() {
                payloads.push(data);
            }
        }
        Ok(payloads)
    }
}

/// Extract text deltas from one streamed GenerateContentResponse
pub fn parse_sse_data(data: &str) -> std::result::Result<Vec<String>, ProviderError> {
    let evt: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("{}: {}", e, data)))?;

    if let Some(error) = evt.get("error") {
        let status = error["code"].as_u64().unwrap_or(0) as u16;
        let message = error["message"].as_str().unwrap_or("unknown error").to_string();
        return Err(ProviderError::from_status(status, message));
    }

    if let Some(reason) = evt["promptFeedback"]["blockReason"].as_str() {
        return Err(ProviderError::Http {
            status: 400,
            body: format!("prompt blocked: {}", reason),
        });
    }

    let deltas = evt["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_buffer_handles_split_events() {
        let mut buffer = SseBuffer::default();
        assert!(buffer.push(b"data: {\"a\":").unwrap().is_empty());
        let payloads = buffer.push(b"1}\n\ndata: {\"b\":2}\n\n").unwrap();
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_sse_buffer_normalizes_crlf() {
        let mut buffer = SseBuffer::default();
        assert!(buffer.push(b"data: {}\r\n\r").unwrap().is_empty());
        assert_eq!(buffer.push(b"\n").unwrap(), vec!["{}"]);
    }

    #[test]
    fn test_sse_buffer_keeps_characters_split_across_chunks() {
        let event = "data: {\"text\":\"こんにちは\"}\n\n".as_bytes();
        let split = event.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut buffer = SseBuffer::default();
        assert!(buffer.push(&event[..split]).unwrap().is_empty());
        let payloads = buffer.push(&event[split..]).unwrap();
        assert_eq!(payloads, vec!["{\"text\":\"こんにちは\"}"]);
    }

    #[test]
    fn test_sse_buffer_rejects_invalid_utf8() {
        let mut buffer = SseBuffer::default();
        assert!(matches!(
            buffer.push(b"data: \xff\xfe\n\n"),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_text_parts() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}],"role":"model"}}]}"#;
        assert_eq!(parse_sse_data(data).unwrap(), vec!["Hel", "lo"]);
    }

    #[test]
    fn test_parse_finish_only_event() {
        let data = r#"{"candidates":[{"finishReason":"STOP"}]}"#;
        assert!(parse_sse_data(data).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_payload() {
        let data = r#"{"error":{"code":429,"message":"quota"}}"#;
        assert_eq!(
            parse_sse_data(data).unwrap_err(),
            ProviderError::RateLimited("quota".to_string())
        );
    }

    #[test]
    fn test_parse_garbage_is_decode_error() {
        assert!(matches!(
            parse_sse_data("not json"),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = GeminiProvider::new("secret-key");
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_factory_requires_api_key() {
        let factory = GeminiProvider::factory();
        assert!(factory(&json!({})).is_err());
        assert!(factory(&json!({"api_key": "k"})).is_ok());
    }

    #[test]
    fn test_record_drops_oldest_exchanges() {
        let mut conversation = Conversation {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            history: Vec::new(),
        };
        for i in 0..3 {
            conversation.record(&format!("q{}", i), &format!("a{}", i), 2);
        }
        let texts: Vec<&str> = conversation
            .history
            .iter()
            .map(|turn| turn["parts"][0]["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2"]);

        conversation.record("q3", "a3", 0);
        assert!(conversation.history.is_empty());
    }
}
