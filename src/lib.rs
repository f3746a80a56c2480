// ABOUTME: Root library module for the prompter application.
// ABOUTME: YouTube source, OAuth, configuration, CLI commands, and process-level setup.

pub mod auth;
pub mod commands;
pub mod config;
pub mod logging;
pub mod paths;
pub mod telemetry;
pub mod youtube;

// Re-export the pipeline crates for convenience
pub use prompter_agent::{AiProvider, ProviderRegistry, SessionSpec};
pub use prompter_core::{ChatSource, PipelineConfig, PipelineError, PipelineOrchestrator};
