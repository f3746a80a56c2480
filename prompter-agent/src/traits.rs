// ABOUTME: Core AiProvider trait that every AI backend implements.
// ABOUTME: Defines session lifecycle and the streaming reply contract.

use crate::ErrorCode;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Parameters used to open a provider-side conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSpec {
    /// Model identifier (e.g., "gemini-2.5-flash")
    pub model: String,
    /// Optional system instruction establishing the persona
    pub system_instruction: Option<String>,
}

impl SessionSpec {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.system_instruction = if instruction.trim().is_empty() {
            None
        } else {
            Some(instruction)
        };
        self
    }
}

/// Errors a provider can report while producing a reply
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Decode(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl ProviderError {
    /// Map to the session-level error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::Auth(_) => ErrorCode::AuthFailed,
            Self::Http { .. } | Self::Decode(_) | Self::UnknownSession(_) => {
                ErrorCode::ProviderError
            }
            Self::Transport(_) => ErrorCode::Unknown,
        }
    }

    /// Classify an HTTP error status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            401 | 403 => Self::Auth(body),
            _ => Self::Http { status, body },
        }
    }
}

/// Stream of text deltas. Ends after the last delta on success; an `Err`
/// item is the provider's error marker and ends the reply.
pub type DeltaStream = BoxStream<'static, std::result::Result<String, ProviderError>>;

/// Core trait that all AI providers implement.
///
/// A provider owns any per-conversation state (history, remote handles);
/// callers refer to it by the session ID returned from `open_session`.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name for logging and metrics
    fn name(&self) -> &'static str;

    /// Open a conversation, returns the session ID
    async fn open_session(&self, spec: &SessionSpec) -> Result<String>;

    /// Submit one input and stream the reply as text deltas
    async fn stream_reply(
        &self,
        session_id: &str,
        text: &str,
    ) -> std::result::Result<DeltaStream, ProviderError>;

    /// Release provider resources held for the session
    async fn close_session(&self, session_id: &str) -> Result<()>;
}
