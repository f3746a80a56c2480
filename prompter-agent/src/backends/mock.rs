// ABOUTME: Mock provider for testing - streams pre-configured replies.
// ABOUTME: Allows deterministic tests without calling a real AI service.
//!
//! # Example
//!
//! ```no_run
//! use prompter_agent::backends::mock::MockProvider;
//! use prompter_agent::{AiSession, OutboundRequest, ResponseEvent, SessionOptions, SessionSpec};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let mock = MockProvider::new()
//!     .on_prompt("hello").respond_chunks(&["Hi ", "there!"])
//!     .on_prompt("boom").respond_hang();
//!
//! let session = AiSession::open(Arc::new(mock), &SessionSpec::new("mock"), SessionOptions::default())
//!     .await
//!     .unwrap();
//! session
//!     .submit(OutboundRequest::new("hello", "alice", chrono::Utc::now()))
//!     .unwrap();
//!
//! let cancel = CancellationToken::new();
//! if let Ok(ResponseEvent::Complete { full_text }) = session.next_event(&cancel).await {
//!     assert_eq!(full_text, "Hi there!");
//! }
//! # }
//! ```

use crate::traits::{AiProvider, DeltaStream, ProviderError, SessionSpec};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock provider for testing. Clones share expectations and recordings.
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    expectations: Mutex<VecDeque<Expectation>>,
    prompts: Mutex<Vec<String>>,
    opened: Mutex<Vec<SessionSpec>>,
    live_sessions: Mutex<HashSet<String>>,
    default_reply: Mutex<Option<String>>,
    chunk_delay: Mutex<Option<Duration>>,
    fail_open: Mutex<Option<String>>,
    session_counter: AtomicU64,
    close_calls: AtomicUsize,
}

struct Expectation {
    pattern: String,
    reply: Reply,
}

enum Reply {
    Chunks(Vec<String>),
    ChunksThenError(Vec<String>, ProviderError),
    Reject(ProviderError),
    Hang,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockProvider {
    /// Create a new mock provider with no expectations
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up an expectation for a prompt containing the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            provider: self,
            pattern: pattern.to_string(),
        }
    }

    /// Reply used when no expectation matches
    pub fn with_default_reply(self, reply: &str) -> Self {
        *lock(&self.inner.default_reply) = Some(reply.to_string());
        self
    }

    /// Wait this long before yielding each chunk
    pub fn with_chunk_delay(self, delay: Duration) -> Self {
        *lock(&self.inner.chunk_delay) = Some(delay);
        self
    }

    /// Make `open_session` fail with the given message
    pub fn fail_open(self, message: &str) -> Self {
        *lock(&self.inner.fail_open) = Some(message.to_string());
        self
    }

    /// Every prompt passed to `stream_reply`, in order
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.inner.prompts).clone()
    }

    /// Specs of every opened session, in order
    pub fn opened_sessions(&self) -> Vec<SessionSpec> {
        lock(&self.inner.opened).clone()
    }

    /// How many times `close_session` was called
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// Expectations not yet consumed
    pub fn pending_expectations(&self) -> usize {
        lock(&self.inner.expectations).len()
    }

    /// Factory function for the registry.
    ///
    /// Recognizes an optional `"reply"` string used for every prompt.
    pub fn factory() -> crate::registry::ProviderFactory {
        Box::new(|config| {
            let mut provider = MockProvider::new();
            if let Some(reply) = config.get("reply").and_then(|v| v.as_str()) {
                provider = provider.with_default_reply(reply);
            }
            Ok(Arc::new(provider) as Arc<dyn AiProvider>)
        })
    }

    // FIFO preference: the front expectation wins when it matches, otherwise
    // the first matching one anywhere in the queue.
    fn take_reply(&self, text: &str) -> Option<Reply> {
        let mut exp = lock(&self.inner.expectations);
        let front_matches = exp.front().is_some_and(|e| text.contains(&e.pattern));
        if front_matches {
            return exp.pop_front().map(|e| e.reply);
        }
        exp.iter()
            .position(|e| text.contains(&e.pattern))
            .and_then(|i| exp.remove(i))
            .map(|e| e.reply)
    }

    fn chunk_stream(&self, chunks: Vec<String>, tail: Option<ProviderError>) -> DeltaStream {
        let delay = *lock(&self.inner.chunk_delay);
        let items = chunks
            .into_iter()
            .map(Ok)
            .chain(tail.map(Err))
            .collect::<Vec<_>>();

        match delay {
            Some(delay) => futures::stream::iter(items)
                .then(move |item| async move {
                    tokio::time::sleep(delay).await;
                    item
                })
                .boxed(),
            None => futures::stream::iter(items).boxed(),
        }
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open_session(&self, spec: &SessionSpec) -> Result<String> {
        if let Some(message) = lock(&self.inner.fail_open).clone() {
            anyhow::bail!(message);
        }
        let n = self.inner.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("mock-session-{}", n);
        lock(&self.inner.opened).push(spec.clone());
        lock(&self.inner.live_sessions).insert(session_id.clone());
        Ok(session_id)
    }

    async fn stream_reply(
        &self,
        session_id: &str,
        text: &str,
    ) -> std::result::Result<DeltaStream, ProviderError> {
        if !lock(&self.inner.live_sessions).contains(session_id) {
            return Err(ProviderError::UnknownSession(session_id.to_string()));
        }
        lock(&self.inner.prompts).push(text.to_string());

        match self.take_reply(text) {
            Some(Reply::Chunks(chunks)) => Ok(self.chunk_stream(chunks, None)),
            Some(Reply::ChunksThenError(chunks, err)) => Ok(self.chunk_stream(chunks, Some(err))),
            Some(Reply::Reject(err)) => Err(err),
            Some(Reply::Hang) => Ok(futures::stream::pending::<std::result::Result<String, ProviderError>>().boxed()),
            None => {
                let reply = lock(&self.inner.default_reply)
                    .clone()
                    .unwrap_or_else(|| format!("Mock: no expectation for '{}'", text));
                Ok(self.chunk_stream(vec![reply], None))
            }
        }
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.live_sessions).remove(session_id);
        Ok(())
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    provider: MockProvider,
    pattern: String,
}

impl ExpectationBuilder {
    fn push(self, reply: Reply) -> MockProvider {
        lock(&self.provider.inner.expectations).push_back(Expectation {
            pattern: self.pattern,
            reply,
        });
        self.provider
    }

    /// Stream the given chunks, then end successfully
    pub fn respond_chunks(self, chunks: &[&str]) -> MockProvider {
        self.push(Reply::Chunks(chunks.iter().map(|c| c.to_string()).collect()))
    }

    /// Stream a single chunk
    pub fn respond_text(self, text: &str) -> MockProvider {
        self.respond_chunks(&[text])
    }

    /// Refuse the request before any streaming starts
    pub fn respond_error(self, err: ProviderError) -> MockProvider {
        self.push(Reply::Reject(err))
    }

    /// Stream the given chunks, then yield the provider's error marker
    pub fn respond_partial_then_error(self, chunks: &[&str], err: ProviderError) -> MockProvider {
        self.push(Reply::ChunksThenError(
            chunks.iter().map(|c| c.to_string()).collect(),
            err,
        ))
    }

    /// Accept the request and never produce anything
    pub fn respond_hang(self) -> MockProvider {
        self.push(Reply::Hang)
    }
}
