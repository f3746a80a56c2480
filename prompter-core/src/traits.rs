// ABOUTME: Core ChatSource trait and data types for live chat platforms.
// ABOUTME: A source discovers the active chat, lists new messages, and posts replies.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One chat message as read from a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Platform-unique message ID
    pub id: String,
    /// Display name of the author
    pub author: String,
    /// Platform ID of the author (channel ID on YouTube)
    pub author_id: String,
    pub text: String,
    pub published_at: DateTime<Utc>,
}

/// One page of messages returned by `ChatSource::list_new_messages`
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<Comment>,
    /// Opaque cursor to pass on the next call
    pub next_cursor: Option<String>,
    /// How long the platform asks us to wait before polling again
    pub suggested_interval: Option<Duration>,
}

/// Failure classes a source reports
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The chat no longer exists or is no longer live
    #[error("chat has ended")]
    Ended,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Live chat platform abstraction
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Platform identifier for logging (e.g., "youtube")
    fn platform_id(&self) -> &'static str;

    /// Find the chat to relay. `Ok(None)` means nothing is live right now.
    async fn resolve_active_source(&self) -> Result<Option<String>>;

    /// Fetch messages after `cursor` (`None` fetches from the start)
    async fn list_new_messages(
        &self,
        source_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<MessagePage, SourceError>;

    /// Post a message to the chat
    async fn post_message(&self, source_id: &str, text: &str) -> Result<()>;
}
