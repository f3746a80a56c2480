// ABOUTME: Streaming AI session abstraction for prompter.
// ABOUTME: Provides the AiProvider trait, the AiSession state machine, and provider backends.

pub mod event;
pub mod registry;
pub mod request;
pub mod session;
pub mod traits;

pub mod backends;

pub use event::{ErrorCode, ResponseEvent};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use request::OutboundRequest;
pub use session::{AiSession, EmitMode, SessionError, SessionOptions, SessionState};
pub use traits::{AiProvider, DeltaStream, ProviderError, SessionSpec};
