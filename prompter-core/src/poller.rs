// ABOUTME: ChatPoller - turns a ChatSource into a stream of new, de-duplicated comments.
// ABOUTME: Owns the poll cursor: active source, continuation, and recently delivered IDs.

use crate::traits::{ChatSource, Comment, SourceError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Mutable polling state, owned by exactly one ChatPoller
#[derive(Debug, Default)]
pub struct PollCursor {
    pub continuation: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Delivered comment IDs and when they were first seen
    pub recent_ids: HashMap<String, Instant>,
    pub active_source: Option<String>,
}

/// Result of one successful poll
#[derive(Debug, Clone)]
pub struct PollBatch {
    /// Chat the comments were read from
    pub source_id: String,
    /// New comments in source order
    pub comments: Vec<Comment>,
    /// Next wait suggested by the source (never zero)
    pub suggested_interval: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("chat source has ended")]
    SourceEnded,

    #[error("no live chat is currently active")]
    NotLive,

    #[error("failed to resolve active chat: {0:#}")]
    Resolve(anyhow::Error),

    #[error("failed to list messages: {0:#}")]
    Transient(anyhow::Error),
}

impl PollError {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceEnded => "source_ended",
            Self::NotLive => "not_live",
            Self::Resolve(_) => "resolve",
            Self::Transient(_) => "transient",
        }
    }

    /// Whether the error should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Resolve(_) | Self::Transient(_))
    }
}

pub struct ChatPoller {
    source: Arc<dyn ChatSource>,
    cursor: PollCursor,
    retention: Duration,
}

impl ChatPoller {
    pub fn new(source: Arc<dyn ChatSource>, retention: Duration) -> Self {
        Self {
            source,
            cursor: PollCursor::default(),
            retention,
        }
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    /// Fetch comments not delivered before.
    ///
    /// Resolves the active chat first when none is cached. A chat that has
    /// ended clears the cursor and yields `SourceEnded`.
    pub async fn poll(&mut self) -> Result<PollBatch, PollError> {
        let source_id = match self.cursor.active_source.clone() {
            Some(id) => id,
            None => self.resolve().await?,
        };

        let listed = self
            .source
            .list_new_messages(&source_id, self.cursor.continuation.as_deref())
            .await;

        let page = match listed {
            Ok(page) => page,
            Err(SourceError::Ended) => {
                tracing::info!(
                    platform = self.source.platform_id(),
                    source_id = %source_id,
                    "Chat ended, clearing cursor"
                );
                self.cursor.active_source = None;
                self.cursor.continuation = None;
                return Err(PollError::SourceEnded);
            }
            Err(SourceError::Other(e)) => return Err(PollError::Transient(e)),
        };

        let now = Instant::now();
        self.collect_garbage(now);

        if page.next_cursor.is_some() {
            self.cursor.continuation = page.next_cursor;
        }

        let mut comments = Vec::with_capacity(page.messages.len());
        for comment in page.messages {
            if self.cursor.recent_ids.contains_key(&comment.id) {
                tracing::trace!(comment_id = %comment.id, "Skipping already delivered comment");
                continue;
            }
            self.cursor.recent_ids.insert(comment.id.clone(), now);
            if self.cursor.last_seen.map_or(true, |seen| comment.published_at > seen) {
                self.cursor.last_seen = Some(comment.published_at);
            }
            comments.push(comment);
        }

        tracing::debug!(
            source_id = %source_id,
            new_comments = comments.len(),
            remembered = self.cursor.recent_ids.len(),
            "Poll complete"
        );

        Ok(PollBatch {
            source_id,
            comments,
            suggested_interval: page.suggested_interval.filter(|d| !d.is_zero()),
        })
    }

    async fn resolve(&mut self) -> Result<String, PollError> {
        let resolved = self
            .source
            .resolve_active_source()
            .await
            .map_err(PollError::Resolve)?;

        let Some(source_id) = resolved else {
            return Err(PollError::NotLive);
        };

        tracing::info!(
            platform = self.source.platform_id(),
            source_id = %source_id,
            "Found active chat"
        );
        self.cursor.active_source = Some(source_id.clone());
        self.cursor.continuation = None;
        Ok(source_id)
    }

    fn collect_garbage(&mut self, now: Instant) {
        let retention = self.retention;
        self.cursor
            .recent_ids
            .retain(|_, seen| now.saturating_duration_since(*seen) < retention);
    }
}
