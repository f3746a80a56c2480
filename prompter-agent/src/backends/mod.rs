// ABOUTME: AI provider implementations (Gemini, mock).
// ABOUTME: Each provider implements the AiProvider trait.

pub mod gemini;
pub mod mock;
