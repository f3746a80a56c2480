// ABOUTME: PipelineOrchestrator - relays polled chat comments through an AI session and posts replies.
// ABOUTME: Runs a receive unit and a poll/send unit under one cancellation token, closing the session on exit.

use crate::{
    backoff::BackoffState,
    config::PipelineConfig,
    metrics,
    poller::{ChatPoller, PollBatch, PollError},
    sanitize::{is_postable, sanitize, ReplySegmenter},
    traits::{ChatSource, Comment},
};
use prompter_agent::{
    AiProvider, AiSession, ErrorCode, OutboundRequest, ResponseEvent, SessionError,
    SessionOptions, SessionSpec,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Reasons `PipelineOrchestrator::run` stops
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to open AI session: {0}")]
    SessionOpen(#[source] SessionError),

    #[error("chat source failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: PollError,
    },

    #[error("AI exchange failed: {0}")]
    Exchange(String),

    #[error("{0} unit stopped unexpectedly")]
    UnitStopped(&'static str),

    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the pipeline stopped because it was asked to
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// How an exchange ended, as reported by the receive unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeOutcome {
    Completed,
    Failed(ErrorCode),
}

impl ExchangeOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(code) => code.as_str(),
        }
    }
}

/// Top-level coordinator for one chat source and one AI session
pub struct PipelineOrchestrator {
    source: Arc<dyn ChatSource>,
    provider: Arc<dyn AiProvider>,
    spec: SessionSpec,
    config: PipelineConfig,
    session_options: SessionOptions,
}

impl PipelineOrchestrator {
    pub fn new(
        source: Arc<dyn ChatSource>,
        provider: Arc<dyn AiProvider>,
        spec: SessionSpec,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            provider,
            spec,
            config,
            session_options: SessionOptions::default(),
        }
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drive the pipeline until `cancel` fires or a fatal error occurs.
    ///
    /// Cancellation is reported as `PipelineError::Cancelled`. Once the
    /// session is open it is closed exactly once on every return path.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            opened = AiSession::open(
                Arc::clone(&self.provider),
                &self.spec,
                self.session_options.clone(),
            ) => opened,
        };
        let session = Arc::new(opened.map_err(PipelineError::SessionOpen)?);

        tracing::info!(
            platform = self.source.platform_id(),
            provider = self.provider.name(),
            model = %self.spec.model,
            dry_run = self.config.dry_run,
            "Pipeline started"
        );

        let result = self.drive(&session, &cancel).await;
        session.close().await;

        match &result {
            Ok(()) => tracing::info!("Pipeline stopped"),
            Err(e) if e.is_cancelled() => tracing::info!("Pipeline cancelled"),
            Err(e) => tracing::error!(error = %e, "Pipeline failed"),
        }
        result
    }

    async fn drive(
        &self,
        session: &Arc<AiSession>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let units = cancel.child_token();
        let post_cancel = CancellationToken::new();
        let posts = TaskTracker::new();
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<PipelineError>(2);
        let (outcome_tx, outcome_rx) = mpsc::channel::<ExchangeOutcome>(8);
        let (target_tx, target_rx) = watch::channel::<Option<String>>(None);

        let receive = ReceiveUnit {
            session: Arc::clone(session),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            target: target_rx,
            outcomes: outcome_tx,
            fatal: fatal_tx.clone(),
            posts: posts.clone(),
            post_cancel: post_cancel.clone(),
            cancel: units.clone(),
        };
        let poll = PollUnit {
            session: Arc::clone(session),
            poller: ChatPoller::new(Arc::clone(&self.source), self.config.retention),
            interval: self.config.poll_interval,
            config: self.config.clone(),
            target: target_tx,
            outcomes: outcome_rx,
            fatal: fatal_tx,
            cancel: units.clone(),
        };

        let receive_handle = tokio::spawn(receive.run());
        let poll_handle = tokio::spawn(poll.run());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            fatal = fatal_rx.recv() => Err(fatal.unwrap_or(PipelineError::UnitStopped("pipeline"))),
        };

        units.cancel();
        let grace = self.config.shutdown_grace;
        let joined = tokio::time::timeout(grace, async {
            let _ = receive_handle.await;
            let _ = poll_handle.await;
        })
        .await;
        if joined.is_err() {
            tracing::warn!(grace = ?grace, "Pipeline units did not stop within the grace period");
        }

        posts.close();
        if tokio::time::timeout(grace, posts.wait()).await.is_err() {
            tracing::warn!(pending = posts.len(), "Abandoning in-flight posts");
            post_cancel.cancel();
            posts.wait().await;
        }

        result
    }
}

/// Consumes session events and dispatches sanitized replies
struct ReceiveUnit {
    session: Arc<AiSession>,
    source: Arc<dyn ChatSource>,
    config: PipelineConfig,
    target: watch::Receiver<Option<String>>,
    outcomes: mpsc::Sender<ExchangeOutcome>,
    fatal: mpsc::Sender<PipelineError>,
    posts: TaskTracker,
    post_cancel: CancellationToken,
    cancel: CancellationToken,
}

impl ReceiveUnit {
    async fn run(self) {
        let mut segments = ReplySegmenter::default();

        loop {
            let event = match self.session.next_event(&self.cancel).await {
                Ok(event) => event,
                Err(SessionError::Cancelled) => break,
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        let _ = self.fatal.try_send(PipelineError::UnitStopped("receive"));
                        tracing::error!(error = %e, "Receive unit lost its session");
                    }
                    break;
                }
            };

            match event {
                ResponseEvent::Chunk(text) => {
                    if let Some(segment) = segments.push(&text) {
                        self.dispatch(&segment);
                    }
                }
                ResponseEvent::Complete { full_text } => {
                    if let Some(rest) = segments.finish(full_text) {
                        self.dispatch(&rest);
                    }
                    if !self.report(ExchangeOutcome::Completed).await {
                        break;
                    }
                }
                ResponseEvent::Error { code, message } => {
                    segments.reset();
                    tracing::warn!(code = code.as_str(), message = %message, "AI exchange failed");
                    if !self.report(ExchangeOutcome::Failed(code)).await {
                        break;
                    }
                    if self.config.fail_on_ai_error {
                        let _ = self.fatal.try_send(PipelineError::Exchange(message));
                        break;
                    }
                }
            }
        }

        tracing::debug!("Receive unit stopped");
    }

    async fn report(&self, outcome: ExchangeOutcome) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.outcomes.send(outcome) => sent.is_ok(),
        }
    }

    /// Sanitize and post without waiting
    fn dispatch(&self, raw: &str) {
        let text = sanitize(raw, self.config.comment_length_cap);
        if !is_postable(&text) {
            tracing::debug!(raw_len = raw.len(), "Suppressing empty reply");
            metrics::record_post("suppressed");
            return;
        }

        if self.config.dry_run {
            tracing::info!(reply = %text, "Dry run, not posting reply");
            metrics::record_post("dry_run");
            return;
        }

        let Some(target) = self.target.borrow().clone() else {
            tracing::warn!(reply = %text, "No active chat to post to, dropping reply");
            metrics::record_post("failed");
            return;
        };

        let source = Arc::clone(&self.source);
        let cancel = self.post_cancel.clone();
        self.posts.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Post abandoned during shutdown");
                }
                result = source.post_message(&target, &text) => match result {
                    Ok(()) => {
                        tracing::info!(reply = %text, "Posted reply");
                        metrics::record_post("sent");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to post reply");
                        metrics::record_post("failed");
                    }
                },
            }
        });
    }
}

enum PollStep {
    Batch(PollBatch),
    Rediscover,
    Cancelled,
}

/// Polls the chat and feeds comments to the session one exchange at a time
struct PollUnit {
    session: Arc<AiSession>,
    poller: ChatPoller,
    interval: Duration,
    config: PipelineConfig,
    target: watch::Sender<Option<String>>,
    outcomes: mpsc::Receiver<ExchangeOutcome>,
    fatal: mpsc::Sender<PipelineError>,
    cancel: CancellationToken,
}

impl PollUnit {
    async fn run(mut self) {
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.poll_with_retry().await {
                Ok(PollStep::Batch(batch)) => {
                    if let Some(suggested) = batch.suggested_interval {
                        if suggested != self.interval {
                            tracing::debug!(interval = ?suggested, "Adopting suggested poll interval");
                        }
                        self.interval = suggested;
                    }
                    self.target.send_replace(Some(batch.source_id));
                    if !self.relay(batch.comments).await {
                        break;
                    }
                    wait = self.interval;
                }
                Ok(PollStep::Rediscover) => {
                    self.target.send_replace(None);
                    wait = self.config.rediscovery_interval;
                }
                Ok(PollStep::Cancelled) => break,
                Err(e) => {
                    let _ = self.fatal.try_send(e);
                    break;
                }
            }
        }

        tracing::debug!("Poll unit stopped");
    }

    async fn poll_with_retry(&mut self) -> Result<PollStep, PipelineError> {
        let mut backoff = BackoffState::new(self.config.backoff_policy());

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PollStep::Cancelled),
                polled = self.poller.poll() => polled,
            };

            let err = match polled {
                Ok(batch) => return Ok(PollStep::Batch(batch)),
                Err(err) => err,
            };

            if !err.is_retryable() {
                metrics::record_rediscovery();
                tracing::info!(
                    reason = %err,
                    wait = ?self.config.rediscovery_interval,
                    "Waiting before looking for a live chat"
                );
                return Ok(PollStep::Rediscover);
            }

            metrics::record_poll_error(err.kind());
            let Some(delay) = backoff.record_failure() else {
                return Err(PipelineError::RetriesExhausted {
                    attempts: backoff.consecutive_failures(),
                    last: err,
                });
            };

            tracing::warn!(
                attempt = backoff.consecutive_failures(),
                max_attempts = self.config.max_retries,
                retry_in = ?delay,
                error = %err,
                "Poll failed, backing off"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(PollStep::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Submit comments oldest first. Returns false when the unit should stop.
    async fn relay(&mut self, mut comments: Vec<Comment>) -> bool {
        if comments.is_empty() {
            return true;
        }
        comments.sort_by_key(|c| c.published_at);
        metrics::record_comments_received(comments.len());
        tracing::info!(count = comments.len(), "New comments");

        for comment in comments {
            if self.config.ignored_author_ids.contains(&comment.author_id) {
                tracing::debug!(comment_id = %comment.id, author_id = %comment.author_id, "Ignoring comment from filtered author");
                continue;
            }
            if comment.text.trim().is_empty() {
                continue;
            }
            if !self.exchange(comment).await {
                return false;
            }
        }
        true
    }

    /// Run one exchange to its terminal event. Returns false when the unit should stop.
    async fn exchange(&mut self, comment: Comment) -> bool {
        tracing::info!(
            comment_id = %comment.id,
            author = %comment.author,
            text = %comment.text,
            "Relaying comment"
        );

        let comment_id = comment.id;
        let request = OutboundRequest::new(comment.text, comment.author, comment.published_at);
        match self.session.submit(request) {
            Ok(()) => {}
            Err(SessionError::Closed) => return false,
            Err(e) => {
                tracing::warn!(comment_id = %comment_id, error = %e, "Could not submit comment");
                return true;
            }
        }

        let started = Instant::now();
        let waited = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            outcome = self.outcomes.recv() => Some(outcome),
            _ = tokio::time::sleep(self.config.exchange_timeout) => None,
        };

        let outcome = match waited {
            Some(outcome) => outcome,
            None => {
                tracing::warn!(
                    comment_id = %comment_id,
                    timeout = ?self.config.exchange_timeout,
                    "AI exchange timed out, aborting"
                );
                self.session.abort_exchange(ErrorCode::Timeout);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return false,
                    outcome = self.outcomes.recv() => outcome,
                }
            }
        };

        let Some(outcome) = outcome else {
            return false;
        };
        metrics::record_exchange(outcome.label(), started.elapsed());
        tracing::debug!(comment_id = %comment_id, outcome = outcome.label(), "Exchange finished");
        true
    }
}
