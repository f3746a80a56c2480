// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and converts sections into pipeline and provider settings

use crate::paths;
use anyhow::{Context, Result};
use prompter_agent::backends::gemini;
use prompter_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

/// Persona used when no system instruction is configured
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly co-host on a YouTube live stream. \
Viewers talk to you through the live chat. Answer in one or two short, warm sentences of plain text \
without markdown, and reply in the language the viewer used.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub youtube: YouTubeConfig,
    pub ai: AiConfig,
    pub pipeline: PipelineSection,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

// ─── YouTubeConfig ──────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    pub channel_id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub oauth_port: u16,
    pub auth_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_path: Option<String>,
    pub request_timeout_secs: u64,
    pub api_base_url: String,
    pub auth_url: String,
    pub token_url: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            oauth_port: 8080,
            auth_timeout_secs: 300,
            token_path: None,
            request_timeout_secs: 30,
            api_base_url: crate::youtube::DEFAULT_API_BASE_URL.to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

// Custom Debug impl to redact client_secret
impl std::fmt::Debug for YouTubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeConfig")
            .field("channel_id", &self.channel_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("oauth_port", &self.oauth_port)
            .field("auth_timeout_secs", &self.auth_timeout_secs)
            .field("token_path", &self.token_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

// ─── AiConfig ───────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Registered provider name ("gemini" or "mock")
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Post the reply sentence by sentence as it streams instead of once at the end
    pub emit_chunks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Past exchanges resent with each prompt
    pub max_history_turns: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: None,
            model: gemini::DEFAULT_MODEL.to_string(),
            system_instruction: None,
            emit_chunks: false,
            base_url: None,
            max_history_turns: gemini::DEFAULT_MAX_HISTORY_TURNS,
        }
    }
}

// Custom Debug impl to redact api_key
impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("system_instruction", &self.system_instruction)
            .field("emit_chunks", &self.emit_chunks)
            .field("base_url", &self.base_url)
            .field("max_history_turns", &self.max_history_turns)
            .finish()
    }
}

// ─── PipelineSection ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub rediscovery_interval_secs: u64,
    pub exchange_timeout_secs: u64,
    pub comment_length_cap: usize,
    pub retention_secs: u64,
    pub dry_run: bool,
    /// Never relay comments written by the configured channel itself
    pub skip_own_messages: bool,
    pub fail_on_ai_error: bool,
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs(),
            max_retries: defaults.max_retries,
            initial_backoff_ms: defaults.initial_backoff.as_millis() as u64,
            max_backoff_secs: defaults.max_backoff.as_secs(),
            rediscovery_interval_secs: defaults.rediscovery_interval.as_secs(),
            exchange_timeout_secs: defaults.exchange_timeout.as_secs(),
            comment_length_cap: defaults.comment_length_cap,
            retention_secs: defaults.retention.as_secs(),
            dry_run: defaults.dry_run,
            skip_own_messages: true,
            fail_on_ai_error: defaults.fail_on_ai_error,
            shutdown_grace_secs: defaults.shutdown_grace.as_secs(),
        }
    }
}

// ─── Logging / Metrics ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is unset
    pub filter: String,
    pub json: bool,
    /// Also write a daily rolling log file in the data directory
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            file: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus `/metrics` endpoint, e.g. "127.0.0.1:9090"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

/// Expand tilde (~) to home directory in paths
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs.home_dir().join(stripped);
        }
        tracing::warn!(
            path = %path,
            "Failed to expand tilde in path: could not determine home directory"
        );
    }
    PathBuf::from(path)
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    val.parse()
        .with_context(|| format!("{} must be a valid number, got: {}", name, val))
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. PROMPTER_CONFIG_PATH env var (if set)
    /// 2. ./prompter.toml (current directory)
    /// 3. ~/.config/prompter/prompter.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("PROMPTER_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "PROMPTER_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from(paths::CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found, then apply
    /// environment variable overrides. Does not validate; see [`Config::validate_for_run`].
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("GEMINI_API_KEY") {
            self.ai.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("PROMPTER_MODEL") {
            self.ai.model = val;
        }
        if let Ok(val) = std::env::var("YOUTUBE_CHANNEL_ID") {
            self.youtube.channel_id = val;
        }
        if let Ok(val) = std::env::var("YT_CLIENT_ID") {
            self.youtube.client_id = val;
        }
        if let Ok(val) = std::env::var("YT_CLIENT_SECRET") {
            self.youtube.client_secret = Some(val);
        }
        if let Ok(val) = std::env::var("PROMPTER_POLL_INTERVAL_SECS") {
            self.pipeline.poll_interval_secs = parse_env("PROMPTER_POLL_INTERVAL_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("PROMPTER_DRY_RUN") {
            self.pipeline.dry_run = matches!(val.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Check everything the `run` command needs
    pub fn validate_for_run(&self) -> Result<()> {
        if self.youtube.channel_id.trim().is_empty() {
            anyhow::bail!(
                "youtube.channel_id is required (set in prompter.toml, YOUTUBE_CHANNEL_ID, or --channel-id)"
            );
        }
        if self.ai.provider == "gemini"
            && self.ai.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            anyhow::bail!("ai.api_key is required for the gemini provider (set GEMINI_API_KEY)");
        }
        if self.ai.model.trim().is_empty() {
            anyhow::bail!("ai.model must not be empty");
        }
        if self.youtube.request_timeout_secs == 0 {
            anyhow::bail!("youtube.request_timeout_secs must be greater than zero");
        }
        self.pipeline_config().validate()
    }

    /// Check everything the `auth` command needs
    pub fn validate_for_auth(&self) -> Result<()> {
        if self.youtube.client_id.trim().is_empty() {
            anyhow::bail!("youtube.client_id is required (set in prompter.toml or YT_CLIENT_ID)");
        }
        if self.youtube.auth_timeout_secs == 0 {
            anyhow::bail!("youtube.auth_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Build the immutable pipeline configuration
    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        let ignored_author_ids = if p.skip_own_messages && !self.youtube.channel_id.is_empty() {
            vec![self.youtube.channel_id.clone()]
        } else {
            Vec::new()
        };

        PipelineConfig {
            poll_interval: Duration::from_secs(p.poll_interval_secs),
            max_retries: p.max_retries,
            initial_backoff: Duration::from_millis(p.initial_backoff_ms),
            max_backoff: Duration::from_secs(p.max_backoff_secs),
            rediscovery_interval: Duration::from_secs(p.rediscovery_interval_secs),
            exchange_timeout: Duration::from_secs(p.exchange_timeout_secs),
            comment_length_cap: p.comment_length_cap,
            retention: Duration::from_secs(p.retention_secs),
            dry_run: p.dry_run,
            fail_on_ai_error: p.fail_on_ai_error,
            ignored_author_ids,
            shutdown_grace: Duration::from_secs(p.shutdown_grace_secs),
        }
    }

    /// Settings handed to the provider registry
    pub fn provider_settings(&self) -> serde_json::Value {
        let mut settings = json!({
            "provider": self.ai.provider,
            "max_history_turns": self.ai.max_history_turns,
        });
        if let Some(ref key) = self.ai.api_key {
            settings["api_key"] = json!(key);
        }
        if let Some(ref url) = self.ai.base_url {
            settings["base_url"] = json!(url);
        }
        settings
    }

    pub fn system_instruction(&self) -> &str {
        self.ai
            .system_instruction
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_INSTRUCTION)
    }

    pub fn token_path(&self) -> PathBuf {
        self.youtube
            .token_path
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(paths::token_file)
    }
}
