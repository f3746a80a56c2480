// ABOUTME: Event types emitted by an AI session while an exchange is in flight.
// ABOUTME: An exchange yields zero or more chunks and exactly one terminal event.

use serde::{Deserialize, Serialize};

/// Events observed by callers of `AiSession::next_event`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseEvent {
    /// Streaming text chunk for real-time delivery
    Chunk(String),

    /// The provider finished the exchange
    Complete {
        /// Concatenation of every chunk produced by the exchange
        full_text: String,
    },

    /// The exchange failed
    Error {
        /// Typed error code for programmatic handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
    },
}

impl ResponseEvent {
    /// Whether this event ends the exchange
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Text carried by the event, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Chunk(text) => Some(text),
            Self::Complete { full_text } => Some(full_text),
            Self::Error { .. } => None,
        }
    }
}

/// Typed error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Exchange exceeded its time budget
    Timeout,
    /// Rate limited by the provider
    RateLimited,
    /// Authentication failed
    AuthFailed,
    /// Exchange was aborted because the session closed
    Cancelled,
    /// Provider-specific error
    ProviderError,
    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Stable lowercase label, used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::AuthFailed => "auth_failed",
            Self::Cancelled => "cancelled",
            Self::ProviderError => "provider_error",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(!ResponseEvent::Chunk("hi".to_string()).is_terminal());
        assert!(ResponseEvent::Complete {
            full_text: "hi".to_string()
        }
        .is_terminal());
        assert!(ResponseEvent::Error {
            code: ErrorCode::Timeout,
            message: "slow".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn test_event_text() {
        assert_eq!(ResponseEvent::Chunk("a".to_string()).text(), Some("a"));
        let err = ResponseEvent::Error {
            code: ErrorCode::Unknown,
            message: "boom".to_string(),
        };
        assert_eq!(err.text(), None);
    }

    #[test]
    fn test_event_serde_shape() {
        let event = ResponseEvent::Complete {
            full_text: "done".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Complete"]["full_text"], "done");
    }
}
