// ABOUTME: YouTube live chat platform - a ChatSource over the YouTube Data API v3.
// ABOUTME: Wire types for the search, videos, and liveChatMessages endpoints live here.

mod client;

pub use client::{YouTubeError, YouTubeSource, DEFAULT_API_BASE_URL};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResult {
    pub id: SearchResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchResultId {
    pub video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Video {
    pub live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveStreamingDetails {
    pub active_live_chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveChatMessageListResponse {
    #[serde(default)]
    pub items: Vec<LiveChatMessage>,
    pub next_page_token: Option<String>,
    pub polling_interval_millis: Option<u64>,
    /// Set once the broadcast has gone offline
    pub offline_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveChatMessage {
    pub id: String,
    pub snippet: LiveChatMessageSnippet,
    pub author_details: Option<AuthorDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveChatMessageSnippet {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub author_channel_id: Option<String>,
    pub published_at: Option<String>,
    pub display_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorDetails {
    pub channel_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertMessageRequest<'a> {
    pub snippet: InsertSnippet<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertSnippet<'a> {
    pub live_chat_id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text_message_details: TextMessageDetails<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextMessageDetails<'a> {
    pub message_text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorItem {
    #[serde(default)]
    pub reason: String,
}
