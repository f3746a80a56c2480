// ABOUTME: OutboundRequest - the unit of input submitted to an AI session.
// ABOUTME: Carries the comment text plus author/timestamp metadata used to frame the prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One input for an AI exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Raw text of the input
    pub text: String,
    /// Display name of whoever wrote the input (empty when unknown)
    pub author: String,
    /// When the input was originally published
    pub timestamp: DateTime<Utc>,
}

impl OutboundRequest {
    pub fn new(text: impl Into<String>, author: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            timestamp,
        }
    }

    /// The text actually sent to the provider: `"{author} says: {text}"`
    pub fn prompt(&self) -> String {
        let author = self.author.trim();
        if author.is_empty() {
            self.text.clone()
        } else {
            format!("{} says: {}", author, self.text)
        }
    }
}
