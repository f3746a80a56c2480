// ABOUTME: Platform-agnostic chat-to-AI relay pipeline.
// ABOUTME: Polls a chat source, runs comments through an AI session, and posts sanitized replies.

pub mod backoff;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod sanitize;
pub mod testing;
pub mod traits;

pub use backoff::{BackoffPolicy, BackoffState};
pub use config::PipelineConfig;
pub use orchestrator::{PipelineError, PipelineOrchestrator};
pub use poller::{ChatPoller, PollBatch, PollCursor, PollError};
pub use sanitize::{is_postable, sanitize, ReplySegmenter, TRUNCATION_SUFFIX};
pub use traits::{ChatSource, Comment, MessagePage, SourceError};

// Re-export prompter-agent types
pub use prompter_agent::{AiProvider, AiSession, EmitMode, ProviderRegistry, SessionOptions, SessionSpec};
