// ABOUTME: Immutable pipeline configuration built once at startup.
// ABOUTME: Read by the orchestrator, poller, and sanitizer; validated before use.

use crate::backoff::BackoffPolicy;
use crate::sanitize::TRUNCATION_SUFFIX;
use anyhow::{bail, Result};
use std::time::Duration;

/// Tunables for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Steady-state wait between polls until the source suggests otherwise
    pub poll_interval: Duration,
    /// Attempts per poll before a transient failure becomes fatal (0 = unlimited)
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles per attempt
    pub initial_backoff: Duration,
    /// Ceiling on any single retry delay. The `initial_backoff * 2^k` sequence
    /// holds until it reaches this value and stays there afterwards.
    pub max_backoff: Duration,
    /// Wait after the chat ends (or nothing is live) before looking again
    pub rediscovery_interval: Duration,
    /// Upper bound on waiting for an AI exchange to finish
    pub exchange_timeout: Duration,
    /// Maximum reply length in code points
    pub comment_length_cap: usize,
    /// How long delivered comment IDs are remembered
    pub retention: Duration,
    /// Log replies instead of posting them
    pub dry_run: bool,
    /// Stop the pipeline when an AI exchange fails
    pub fail_on_ai_error: bool,
    /// Comments from these author IDs are never relayed
    pub ignored_author_ids: Vec<String>,
    /// How long teardown waits for units and in-flight posts
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            rediscovery_interval: Duration::from_secs(30),
            exchange_timeout: Duration::from_secs(60),
            comment_length_cap: 200,
            retention: Duration::from_secs(3600),
            dry_run: false,
            fail_on_ai_error: false,
            ignored_author_ids: Vec::new(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Backoff policy for retrying failed polls
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.initial_backoff,
            max_delay: self.max_backoff.max(self.initial_backoff),
            multiplier: 2,
            max_attempts: self.max_retries,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        if self.rediscovery_interval.is_zero() {
            bail!("rediscovery interval must be greater than zero");
        }
        if self.exchange_timeout.is_zero() {
            bail!("exchange timeout must be greater than zero");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial backoff must be greater than zero");
        }
        let suffix_len = TRUNCATION_SUFFIX.chars().count();
        if self.comment_length_cap < suffix_len {
            bail!(
                "comment length cap must be at least {} (got {})",
                suffix_len,
                self.comment_length_cap
            );
        }
        Ok(())
    }
}
