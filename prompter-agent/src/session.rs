// ABOUTME: AiSession turns a provider's streaming reply into observable response events.
// ABOUTME: Owns the Idle/Sending/Streaming/Completed/Failed state machine for serialized exchanges.

use crate::{AiProvider, ErrorCode, OutboundRequest, ResponseEvent, SessionSpec};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle of the current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

/// Which events a session delivers to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    /// Every text delta is delivered as a `Chunk` before the terminal event
    Chunks,
    /// Only the terminal event is delivered
    #[default]
    FinalOnly,
}

/// Tunables for an AiSession
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub emit: EmitMode,
    /// Capacity of the event queue between the stream consumer and callers
    pub event_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            emit: EmitMode::default(),
            event_buffer: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is busy with another exchange (state: {0:?})")]
    Busy(SessionState),

    #[error("session is closed")]
    Closed,

    #[error("cancelled while waiting for the next event")]
    Cancelled,

    #[error("failed to open provider session: {0:#}")]
    Open(anyhow::Error),
}

struct Exchange {
    id: Uuid,
    token: CancellationToken,
    abort_reason: Option<ErrorCode>,
}

struct Shared {
    state: SessionState,
    exchange: Option<Exchange>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// A conversation with an AI provider that runs one exchange at a time.
///
/// `submit` dispatches an exchange and returns immediately; a spawned stream
/// consumer pushes events into a queue that `next_event` drains. Delivering
/// the terminal event returns the session to `Idle`, which is what allows the
/// next `submit`.
pub struct AiSession {
    provider: Arc<dyn AiProvider>,
    session_id: String,
    emit: EmitMode,
    shared: Arc<Mutex<Shared>>,
    events_tx: mpsc::Sender<ResponseEvent>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<ResponseEvent>>,
    closed: CancellationToken,
    close_started: AtomicBool,
}

impl AiSession {
    /// Open a provider session and wrap it
    pub async fn open(
        provider: Arc<dyn AiProvider>,
        spec: &SessionSpec,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let session_id = provider
            .open_session(spec)
            .await
            .map_err(SessionError::Open)?;

        tracing::info!(
            provider = provider.name(),
            session_id = %session_id,
            model = %spec.model,
            has_instruction = spec.system_instruction.is_some(),
            "AI session opened"
        );

        let (events_tx, events_rx) = mpsc::channel(options.event_buffer.max(1));
        Ok(Self {
            provider,
            session_id,
            emit: options.emit,
            shared: Arc::new(Mutex::new(Shared {
                state: SessionState::Idle,
                exchange: None,
            })),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            closed: CancellationToken::new(),
            close_started: AtomicBool::new(false),
        })
    }

    /// Provider-side session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current state (diagnostics only; callers coordinate through events)
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Start an exchange. Fails unless the session is `Idle`.
    pub fn submit(&self, request: OutboundRequest) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let (exchange_id, token) = {
            let mut shared = lock(&self.shared);
            if shared.state != SessionState::Idle {
                return Err(SessionError::Busy(shared.state));
            }
            let token = self.closed.child_token();
            let id = Uuid::new_v4();
            shared.state = SessionState::Sending;
            shared.exchange = Some(Exchange {
                id,
                token: token.clone(),
                abort_reason: None,
            });
            (id, token)
        };

        tracing::debug!(
            exchange_id = %exchange_id,
            author = %request.author,
            "Submitting exchange"
        );

        let consumer = StreamConsumer {
            provider: Arc::clone(&self.provider),
            session_id: self.session_id.clone(),
            exchange_id,
            shared: Arc::clone(&self.shared),
            tx: self.events_tx.clone(),
            token,
            session_closed: self.closed.clone(),
            emit: self.emit,
        };
        tokio::spawn(consumer.run(request.prompt()));

        Ok(())
    }

    /// Wait for the next event of the current exchange.
    ///
    /// Returns `Cancelled` when `cancel` fires and `Closed` once the session
    /// has been closed.
    pub async fn next_event(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ResponseEvent, SessionError> {
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            _ = self.closed.cancelled() => return Err(SessionError::Closed),
            rx = self.events_rx.lock() => rx,
        };

        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            _ = self.closed.cancelled() => return Err(SessionError::Closed),
            event = rx.recv() => event.ok_or(SessionError::Closed)?,
        };

        if event.is_terminal() {
            let mut shared = lock(&self.shared);
            shared.state = SessionState::Idle;
            shared.exchange = None;
        }

        Ok(event)
    }

    /// Abort the in-flight exchange, if any. The stream consumer emits an
    /// `Error` with `reason` as the exchange's terminal event.
    pub fn abort_exchange(&self, reason: ErrorCode) -> bool {
        let mut guard = lock(&self.shared);
        let Shared { state, exchange } = &mut *guard;
        match exchange {
            Some(exchange) if matches!(state, SessionState::Sending | SessionState::Streaming) => {
                tracing::debug!(exchange_id = %exchange.id, reason = reason.as_str(), "Aborting exchange");
                exchange.abort_reason = Some(reason);
                exchange.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Release provider resources. Idempotent.
    pub async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();

        if let Err(e) = self.provider.close_session(&self.session_id).await {
            tracing::warn!(
                session_id = %self.session_id,
                error = %e,
                "Failed to close provider session"
            );
        }
        tracing::info!(session_id = %self.session_id, "AI session closed");
    }
}

impl Drop for AiSession {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Transient task that consumes one provider reply
struct StreamConsumer {
    provider: Arc<dyn AiProvider>,
    session_id: String,
    exchange_id: Uuid,
    shared: Arc<Mutex<Shared>>,
    tx: mpsc::Sender<ResponseEvent>,
    token: CancellationToken,
    session_closed: CancellationToken,
    emit: EmitMode,
}

impl StreamConsumer {
    async fn run(self, prompt: String) {
        let started = tokio::select! {
            _ = self.token.cancelled() => {
                self.finish_aborted().await;
                return;
            }
            result = self.provider.stream_reply(&self.session_id, &prompt) => result,
        };

        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => {
                self.finish_failed(e.code(), e.to_string()).await;
                return;
            }
        };

        self.transition(SessionState::Streaming);
        let mut full_text = String::new();

        loop {
            let item = tokio::select! {
                _ = self.token.cancelled() => {
                    self.finish_aborted().await;
                    return;
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    full_text.push_str(&delta);
                    if self.emit == EmitMode::Chunks {
                        tokio::select! {
                            _ = self.token.cancelled() => {
                                self.finish_aborted().await;
                                return;
                            }
                            sent = self.tx.send(ResponseEvent::Chunk(delta)) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    self.finish_failed(e.code(), e.to_string()).await;
                    return;
                }
                None => break,
            }
        }

        tracing::debug!(
            exchange_id = %self.exchange_id,
            response_len = full_text.len(),
            "Exchange completed"
        );
        self.transition(SessionState::Completed);
        self.emit_terminal(ResponseEvent::Complete { full_text }).await;
    }

    async fn finish_aborted(&self) {
        let reason = lock(&self.shared)
            .exchange
            .as_ref()
            .filter(|e| e.id == self.exchange_id)
            .and_then(|e| e.abort_reason)
            .unwrap_or(ErrorCode::Cancelled);

        let message = match reason {
            ErrorCode::Timeout => "exchange timed out".to_string(),
            ErrorCode::Cancelled => "exchange cancelled".to_string(),
            other => format!("exchange aborted ({})", other.as_str()),
        };
        self.finish_failed(reason, message).await;
    }

    async fn finish_failed(&self, code: ErrorCode, message: String) {
        tracing::warn!(
            exchange_id = %self.exchange_id,
            code = code.as_str(),
            message = %message,
            "Exchange failed"
        );
        self.transition(SessionState::Failed);
        self.emit_terminal(ResponseEvent::Error { code, message }).await;
    }

    fn transition(&self, to: SessionState) {
        let mut shared = lock(&self.shared);
        tracing::trace!(exchange_id = %self.exchange_id, from = ?shared.state, to = ?to, "Session state transition");
        shared.state = to;
    }

    async fn emit_terminal(&self, event: ResponseEvent) {
        if self.session_closed.is_cancelled() {
            // Nobody is listening any more; never block on a closed session
            let _ = self.tx.try_send(event);
            return;
        }
        tokio::select! {
            _ = self.session_closed.cancelled() => {}
            _ = self.tx.send(event) => {}
        }
    }
}
