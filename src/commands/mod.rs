// ABOUTME: Command-line interface definitions for the auth and run subcommands.
// ABOUTME: Flags override values loaded from prompter.toml and the environment.

pub mod auth;
pub mod run;

use crate::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "prompter",
    version,
    about = "Answer YouTube live chat comments with Gemini"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorize YouTube access and save the OAuth token
    Auth(AuthArgs),
    /// Relay live chat comments to the AI and post the replies
    Run(RunArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct AuthArgs {
    /// Local port for the OAuth redirect
    #[arg(long)]
    pub oauth_port: Option<u16>,

    #[arg(long)]
    pub client_id: Option<String>,

    #[arg(long)]
    pub client_secret: Option<String>,

    /// How long to wait for the browser redirect (e.g. "5m")
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

impl AuthArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.oauth_port {
            config.youtube.oauth_port = port;
        }
        if let Some(ref id) = self.client_id {
            config.youtube.client_id = id.clone();
        }
        if let Some(ref secret) = self.client_secret {
            config.youtube.client_secret = Some(secret.clone());
        }
        if let Some(timeout) = self.timeout {
            config.youtube.auth_timeout_secs = timeout.as_secs().max(1);
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// YouTube channel whose live chat to relay
    #[arg(long)]
    pub channel_id: Option<String>,

    /// Wait between polls until YouTube suggests otherwise (e.g. "5s")
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Registered AI provider ("gemini" or "mock")
    #[arg(long)]
    pub provider: Option<String>,

    /// System instruction for the AI session
    #[arg(long, conflicts_with = "instruction_file")]
    pub instruction: Option<String>,

    /// Read the system instruction from a file
    #[arg(long)]
    pub instruction_file: Option<PathBuf>,

    /// Log replies instead of posting them
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum reply length in characters
    #[arg(long)]
    pub cap: Option<usize>,

    /// Attempts per poll before giving up (0 = unlimited)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Post the reply sentence by sentence as it streams
    #[arg(long, default_value_t = false)]
    pub emit_chunks: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(ref id) = self.channel_id {
            config.youtube.channel_id = id.clone();
        }
        if let Some(ref key) = self.api_key {
            config.ai.api_key = Some(key.clone());
        }
        if let Some(ref model) = self.model {
            config.ai.model = model.clone();
        }
        if let Some(ref provider) = self.provider {
            config.ai.provider = provider.clone();
        }
        if let Some(ref instruction) = self.instruction {
            config.ai.system_instruction = Some(instruction.clone());
        }
        if let Some(ref path) = self.instruction_file {
            let text = std::fs::read_to_string(path).with_context(|| {
                format!("Failed to read instruction file {}", path.display())
            })?;
            config.ai.system_instruction = Some(text.trim().to_string());
        }
        if self.dry_run {
            config.pipeline.dry_run = true;
        }
        if let Some(cap) = self.cap {
            config.pipeline.comment_length_cap = cap;
        }
        if let Some(retries) = self.max_retries {
            config.pipeline.max_retries = retries;
        }
        if self.emit_chunks {
            config.ai.emit_chunks = true;
        }
        Ok(())
    }
}

/// Parse "500ms", "5s", "2m", "1h", or a plain number of seconds
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        other => return Err(format!("unknown duration unit '{}' in '{}'", other, input)),
    };

    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
