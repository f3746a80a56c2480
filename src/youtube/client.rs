// ABOUTME: YouTubeSource - finds a channel's live chat, lists its messages, and posts replies.
// ABOUTME: Maps ended or missing chats to SourceError::Ended so the pipeline waits and rediscovers.

use super::{
    ApiErrorResponse, InsertMessageRequest, InsertSnippet, LiveChatMessage,
    LiveChatMessageListResponse, SearchListResponse, TextMessageDetails, VideoListResponse,
};
use crate::auth::AccessTokenSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prompter_core::{ChatSource, Comment, MessagePage, SourceError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Error reasons meaning the chat is gone for good
const ENDED_REASONS: &[&str] = &["liveChatEnded", "liveChatNotFound", "liveChatDisabled"];

#[derive(Debug, thiserror::Error)]
pub enum YouTubeError {
    #[error("YouTube API returned {status}: {message}")]
    Api {
        status: u16,
        message: String,
        reasons: Vec<String>,
    },

    #[error("YouTube request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to obtain access token: {0:#}")]
    Auth(anyhow::Error),
}

impl YouTubeError {
    pub fn is_chat_ended(&self) -> bool {
        match self {
            Self::Api {
                message, reasons, ..
            } => {
                reasons.iter().any(|r| ENDED_REASONS.contains(&r.as_str()))
                    || message.contains("live chat is inactive")
                    || message.contains("liveChatEnded")
            }
            _ => false,
        }
    }
}

pub struct YouTubeSource {
    channel_id: String,
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
}

impl YouTubeSource {
    pub fn new(
        channel_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build YouTube HTTP client")?;
        Ok(Self {
            channel_id: channel_id.into(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
            client,
            tokens,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn bearer(&self) -> std::result::Result<String, YouTubeError> {
        self.tokens.access_token().await.map_err(YouTubeError::Auth)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<T, YouTubeError> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn find_live_video(&self) -> std::result::Result<Option<String>, YouTubeError> {
        let search: SearchListResponse = self
            .get_json(
                "search",
                &[
                    ("part", "id"),
                    ("channelId", self.channel_id.as_str()),
                    ("eventType", "live"),
                    ("type", "video"),
                    ("maxResults", "1"),
                ],
            )
            .await?;
        Ok(search.items.into_iter().find_map(|item| item.id.video_id))
    }

    async fn find_live_chat(&self, video_id: &str) -> std::result::Result<Option<String>, YouTubeError> {
        let videos: VideoListResponse = self
            .get_json("videos", &[("part", "liveStreamingDetails"), ("id", video_id)])
            .await?;
        Ok(videos
            .items
            .into_iter()
            .filter_map(|v| v.live_streaming_details)
            .find_map(|d| d.active_live_chat_id)
            .filter(|id| !id.is_empty()))
    }
}

async fn check_status(resp: reqwest::Response) -> std::result::Result<reqwest::Response, YouTubeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let parsed: ApiErrorResponse = serde_json::from_str(&body).unwrap_or_default();
    let (message, reasons) = match parsed.error {
        Some(err) => (
            err.message,
            err.errors.into_iter().map(|e| e.reason).collect(),
        ),
        None => (body, Vec::new()),
    };
    Err(YouTubeError::Api {
        status: status.as_u16(),
        message,
        reasons,
    })
}

fn parse_published_at(raw: Option<&str>, message_id: &str) -> DateTime<Utc> {
    match raw.map(DateTime::parse_from_rfc3339) {
        Some(Ok(ts)) => ts.with_timezone(&Utc),
        Some(Err(e)) => {
            tracing::warn!(message_id = %message_id, error = %e, "Unparseable publishedAt, using now");
            Utc::now()
        }
        None => Utc::now(),
    }
}

fn to_comment(item: LiveChatMessage) -> Option<Comment> {
    let Some(text) = item.snippet.display_message.filter(|t| !t.is_empty()) else {
        tracing::trace!(message_id = %item.id, kind = %item.snippet.kind, "Skipping chat event without text");
        return None;
    };
    let published_at = parse_published_at(item.snippet.published_at.as_deref(), &item.id);
    let (author, author_id) = match item.author_details {
        Some(details) => (
            details.display_name.unwrap_or_default(),
            details.channel_id.or(item.snippet.author_channel_id),
        ),
        None => (String::new(), item.snippet.author_channel_id),
    };

    Some(Comment {
        id: item.id,
        author,
        author_id: author_id.unwrap_or_default(),
        text,
        published_at,
    })
}

/// Live chat renders messages on a single line
fn flatten_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ChatSource for YouTubeSource {
    fn platform_id(&self) -> &'static str {
        "youtube"
    }

    async fn resolve_active_source(&self) -> Result<Option<String>> {
        let Some(video_id) = self.find_live_video().await? else {
            tracing::info!(channel_id = %self.channel_id, "No live broadcast found");
            return Ok(None);
        };

        let chat_id = self.find_live_chat(&video_id).await?;
        if chat_id.is_none() {
            tracing::info!(video_id = %video_id, "Live broadcast has no active chat");
        }
        Ok(chat_id)
    }

    async fn list_new_messages(
        &self,
        source_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<MessagePage, SourceError> {
        let mut query = vec![
            ("liveChatId", source_id),
            ("part", "snippet,authorDetails"),
        ];
        if let Some(token) = cursor {
            query.push(("pageToken", token));
        }

        let resp: LiveChatMessageListResponse =
            match self.get_json("liveChat/messages", &query).await {
                Ok(resp) => resp,
                Err(e) if e.is_chat_ended() => {
                    tracing::info!(live_chat_id = %source_id, error = %e, "Live chat ended");
                    return Err(SourceError::Ended);
                }
                Err(e) => return Err(SourceError::Other(e.into())),
            };

        if resp.offline_at.is_some() && resp.items.is_empty() {
            tracing::info!(live_chat_id = %source_id, "Broadcast is offline");
            return Err(SourceError::Ended);
        }

        let messages: Vec<Comment> = resp.items.into_iter().filter_map(to_comment).collect();
        tracing::debug!(
            live_chat_id = %source_id,
            count = messages.len(),
            "Fetched live chat messages"
        );

        Ok(MessagePage {
            messages,
            next_cursor: resp.next_page_token,
            suggested_interval: resp.polling_interval_millis.map(Duration::from_millis),
        })
    }

    async fn post_message(&self, source_id: &str, text: &str) -> Result<()> {
        let flattened = flatten_lines(text);
        let body = InsertMessageRequest {
            snippet: InsertSnippet {
                live_chat_id: source_id,
                kind: "textMessageEvent",
                text_message_details: TextMessageDetails {
                    message_text: &flattened,
                },
            },
        };

        let token = self.bearer().await?;
        let resp = self
            .client
            .post(format!("{}/liveChat/messages", self.base_url))
            .bearer_auth(token)
            .query(&[("part", "snippet")])
            .json(&body)
            .send()
            .await
            .map_err(YouTubeError::from)?;
        check_status(resp).await?;

        tracing::debug!(live_chat_id = %source_id, len = flattened.chars().count(), "Message posted");
        Ok(())
    }
}
