// ABOUTME: Scripted in-memory ChatSource for deterministic pipeline tests.
// ABOUTME: Replays queued pages, end signals, and failures while recording every call.

use crate::traits::{ChatSource, Comment, MessagePage, SourceError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Build a comment with the author's name doubling as its author ID
pub fn comment(id: &str, author: &str, text: &str, published_at: DateTime<Utc>) -> Comment {
    Comment {
        id: id.to_string(),
        author: author.to_string(),
        author_id: format!("UC-{}", author),
        text: text.to_string(),
        published_at,
    }
}

enum ListStep {
    Page(MessagePage),
    Ended,
    Fail(String),
}

enum ResolveStep {
    Found(String),
    NotLive,
    Fail(String),
}

/// One recorded `list_new_messages` call
#[derive(Debug, Clone)]
pub struct ListCall {
    pub source_id: String,
    pub cursor: Option<String>,
    pub at: Instant,
}

/// Chat source that replays a script. Clones share the script and recordings.
#[derive(Clone)]
pub struct ScriptedSource {
    inner: Arc<Inner>,
}

struct Inner {
    source_id: String,
    list_steps: Mutex<VecDeque<ListStep>>,
    resolve_steps: Mutex<VecDeque<ResolveStep>>,
    list_calls: Mutex<Vec<ListCall>>,
    resolve_calls: AtomicUsize,
    posts: Mutex<Vec<(String, String)>>,
    post_attempts: AtomicUsize,
    fail_posts: AtomicBool,
    posted: Notify,
    page_counter: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedSource {
    /// Source whose resolve step returns `source_id` unless scripted otherwise
    pub fn new(source_id: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                source_id: source_id.to_string(),
                list_steps: Mutex::new(VecDeque::new()),
                resolve_steps: Mutex::new(VecDeque::new()),
                list_calls: Mutex::new(Vec::new()),
                resolve_calls: AtomicUsize::new(0),
                posts: Mutex::new(Vec::new()),
                post_attempts: AtomicUsize::new(0),
                fail_posts: AtomicBool::new(false),
                posted: Notify::new(),
                page_counter: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue a page of comments
    pub fn then_page(self, comments: Vec<Comment>) -> Self {
        self.then_page_with_interval(comments, None)
    }

    /// Queue a page of comments with a suggested polling interval
    pub fn then_page_with_interval(self, comments: Vec<Comment>, interval: Option<Duration>) -> Self {
        let n = self.inner.page_counter.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.inner.list_steps).push_back(ListStep::Page(MessagePage {
            messages: comments,
            next_cursor: Some(format!("cursor-{}", n)),
            suggested_interval: interval,
        }));
        self
    }

    /// Queue the chat-ended signal
    pub fn then_ended(self) -> Self {
        lock(&self.inner.list_steps).push_back(ListStep::Ended);
        self
    }

    /// Queue a transient listing failure
    pub fn then_fail(self, message: &str) -> Self {
        lock(&self.inner.list_steps).push_back(ListStep::Fail(message.to_string()));
        self
    }

    /// Queue a resolve result of "nothing is live"
    pub fn resolve_not_live(self) -> Self {
        lock(&self.inner.resolve_steps).push_back(ResolveStep::NotLive);
        self
    }

    /// Queue a resolve that finds a specific source
    pub fn resolve_to(self, source_id: &str) -> Self {
        lock(&self.inner.resolve_steps).push_back(ResolveStep::Found(source_id.to_string()));
        self
    }

    /// Queue a resolve failure
    pub fn resolve_fail(self, message: &str) -> Self {
        lock(&self.inner.resolve_steps).push_back(ResolveStep::Fail(message.to_string()));
        self
    }

    /// Make every `post_message` call fail
    pub fn fail_posts(self) -> Self {
        self.inner.fail_posts.store(true, Ordering::SeqCst);
        self
    }

    pub fn list_calls(&self) -> Vec<ListCall> {
        lock(&self.inner.list_calls).clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.inner.resolve_calls.load(Ordering::SeqCst)
    }

    /// Successful posts as `(source_id, text)`
    pub fn posts(&self) -> Vec<(String, String)> {
        lock(&self.inner.posts).clone()
    }

    /// Every post attempt, successful or not
    pub fn post_attempts(&self) -> usize {
        self.inner.post_attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` post attempts have been made
    pub async fn wait_for_post_attempts(&self, count: usize) {
        loop {
            let notified = self.inner.posted.notified();
            if self.post_attempts() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ChatSource for ScriptedSource {
    fn platform_id(&self) -> &'static str {
        "scripted"
    }

    async fn resolve_active_source(&self) -> Result<Option<String>> {
        self.inner.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.inner.resolve_steps).pop_front();
        match step {
            Some(ResolveStep::Found(id)) => Ok(Some(id)),
            Some(ResolveStep::NotLive) => Ok(None),
            Some(ResolveStep::Fail(message)) => Err(anyhow!(message)),
            None => Ok(Some(self.inner.source_id.clone())),
        }
    }

    async fn list_new_messages(
        &self,
        source_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<MessagePage, SourceError> {
        lock(&self.inner.list_calls).push(ListCall {
            source_id: source_id.to_string(),
            cursor: cursor.map(str::to_string),
            at: Instant::now(),
        });

        let step = lock(&self.inner.list_steps).pop_front();
        match step {
            Some(ListStep::Page(page)) => Ok(page),
            Some(ListStep::Ended) => Err(SourceError::Ended),
            Some(ListStep::Fail(message)) => Err(SourceError::Other(anyhow!(message))),
            None => Ok(MessagePage::default()),
        }
    }

    async fn post_message(&self, source_id: &str, text: &str) -> Result<()> {
        self.inner.post_attempts.fetch_add(1, Ordering::SeqCst);
        let result = if self.inner.fail_posts.load(Ordering::SeqCst) {
            Err(anyhow!("post rejected"))
        } else {
            lock(&self.inner.posts).push((source_id.to_string(), text.to_string()));
            Ok(())
        };
        self.inner.posted.notify_waiters();
        result
    }
}
