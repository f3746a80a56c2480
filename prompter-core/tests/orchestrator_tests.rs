// ABOUTME: Integration tests for the PipelineOrchestrator.
// ABOUTME: Drives ScriptedSource and MockProvider under paused time to check ordering, backoff, and shutdown.

use chrono::{DateTime, Utc};
use prompter_agent::backends::mock::MockProvider;
use prompter_agent::{EmitMode, ProviderError, SessionOptions, SessionSpec};
use prompter_core::testing::{comment, ScriptedSource};
use prompter_core::{PipelineConfig, PipelineError, PipelineOrchestrator, TRUNCATION_SUFFIX};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        poll_interval: Duration::from_secs(5),
        max_retries: 3,
        initial_backoff: Duration::from_secs(1),
        ..Default::default()
    }
}

fn start(
    source: &ScriptedSource,
    mock: &MockProvider,
    config: PipelineConfig,
    emit: EmitMode,
) -> (CancellationToken, JoinHandle<Result<(), PipelineError>>) {
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(source.clone()),
        Arc::new(mock.clone()),
        SessionSpec::new("mock-model"),
        config,
    )
    .with_session_options(SessionOptions {
        emit,
        ..Default::default()
    });

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel).await }
    });
    (cancel, handle)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn wait_posts(source: &ScriptedSource, count: usize) {
    tokio::time::timeout(Duration::from_secs(120), source.wait_for_post_attempts(count))
        .await
        .expect("timed out waiting for posts");
}

async fn stop(
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), PipelineError>>,
) -> Result<(), PipelineError> {
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("pipeline did not stop")
        .expect("pipeline task panicked")
}

fn gap(source: &ScriptedSource, from: usize, to: usize) -> Duration {
    let calls = source.list_calls();
    calls[to].at - calls[from].at
}

#[tokio::test(start_paused = true)]
async fn test_comment_is_answered_and_posted() {
    let source = ScriptedSource::new("chat-1")
        .then_page(vec![comment("c1", "alice", "hi **team**", at(1))]);
    let mock = MockProvider::new()
        .on_prompt("alice says: hi **team**")
        .respond_text("Hello alice!");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    assert_eq!(
        source.posts(),
        vec![("chat-1".to_string(), "Hello alice!".to_string())]
    );
    assert!(stop(cancel, handle).await.unwrap_err().is_cancelled());
    assert_eq!(mock.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_long_reply_is_truncated_to_cap() {
    let source =
        ScriptedSource::new("chat-1").then_page(vec![comment("c1", "alice", "tell me", at(1))]);
    let long_reply = "word ".repeat(120);
    let mock = MockProvider::new()
        .on_prompt("tell me")
        .respond_text(&long_reply);
    let config = PipelineConfig {
        comment_length_cap: 500,
        ..config()
    };

    let (cancel, handle) = start(&source, &mock, config, EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    let posts = source.posts();
    let text = &posts[0].1;
    assert!(text.chars().count() <= 500);
    assert!(text.ends_with(TRUNCATION_SUFFIX));
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_source_ended_waits_rediscovery_interval() {
    let source = ScriptedSource::new("chat-1")
        .then_ended()
        .then_page(vec![comment("c1", "alice", "back again", at(1))]);
    let mock = MockProvider::new().with_default_reply("welcome back");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    let wait = gap(&source, 0, 1);
    assert!(wait >= Duration::from_secs(30), "waited {:?}", wait);
    assert!(wait < Duration::from_secs(31), "waited {:?}", wait);
    assert_eq!(source.resolve_calls(), 2);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_recover() {
    let source = ScriptedSource::new("chat-1")
        .then_fail("503 backend error")
        .then_fail("503 backend error")
        .then_page(vec![comment("c1", "alice", "third time", at(1))]);
    let mock = MockProvider::new().with_default_reply("lucky");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    let first = gap(&source, 0, 1);
    let second = gap(&source, 1, 2);
    assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1100));
    assert!(second >= Duration::from_secs(2) && second < Duration::from_millis(2100));
    assert_eq!(source.posts()[0].1, "lucky");
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_is_fatal() {
    let source = ScriptedSource::new("chat-1")
        .then_fail("503")
        .then_fail("503")
        .then_fail("503");
    let mock = MockProvider::new();

    let (_cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    let result = tokio::time::timeout(Duration::from_secs(60), handle)
        .await
        .unwrap()
        .unwrap();

    match result {
        Err(PipelineError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(source.list_calls().len(), 3);
    assert_eq!(mock.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_ai_closes_session_once() {
    let source =
        ScriptedSource::new("chat-1").then_page(vec![comment("c1", "alice", "stall", at(1))]);
    let mock = MockProvider::new().on_prompt("stall").respond_hang();

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_until(|| mock.prompts().len() == 1).await;

    let result = stop(cancel, handle).await;
    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(mock.close_calls(), 1);
    assert!(source.posts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_comments_are_submitted_oldest_first() {
    let source = ScriptedSource::new("chat-1").then_page(vec![
        comment("c2", "bob", "second", at(20)),
        comment("c1", "alice", "first", at(10)),
        comment("c3", "carol", "third", at(30)),
    ]);
    let mock = MockProvider::new().with_default_reply("ok");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 3).await;

    assert_eq!(
        mock.prompts(),
        vec![
            "alice says: first".to_string(),
            "bob says: second".to_string(),
            "carol says: third".to_string(),
        ]
    );
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_ai_error_does_not_stop_pipeline() {
    let source = ScriptedSource::new("chat-1").then_page(vec![
        comment("c1", "alice", "limited", at(1)),
        comment("c2", "bob", "fine", at(2)),
    ]);
    let mock = MockProvider::new()
        .on_prompt("limited")
        .respond_error(ProviderError::RateLimited("quota".to_string()))
        .on_prompt("fine")
        .respond_text("all good");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    assert_eq!(source.posts()[0].1, "all good");
    assert!(!handle.is_finished());
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_ai_error_is_fatal_when_configured() {
    let source =
        ScriptedSource::new("chat-1").then_page(vec![comment("c1", "alice", "limited", at(1))]);
    let mock = MockProvider::new()
        .on_prompt("limited")
        .respond_error(ProviderError::Auth("bad key".to_string()));
    let config = PipelineConfig {
        fail_on_ai_error: true,
        ..config()
    };

    let (_cancel, handle) = start(&source, &mock, config, EmitMode::FinalOnly);
    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(PipelineError::Exchange(ref m)) if m.contains("bad key")));
    assert_eq!(mock.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_exchange_times_out_and_pipeline_moves_on() {
    let source = ScriptedSource::new("chat-1").then_page(vec![
        comment("c1", "alice", "stall", at(1)),
        comment("c2", "bob", "next", at(2)),
    ]);
    let mock = MockProvider::new()
        .on_prompt("stall")
        .respond_hang()
        .on_prompt("next")
        .respond_text("moving on");
    let config = PipelineConfig {
        exchange_timeout: Duration::from_secs(10),
        ..config()
    };

    let (cancel, handle) = start(&source, &mock, config, EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    assert_eq!(
        source.posts(),
        vec![("chat-1".to_string(), "moving on".to_string())]
    );
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_never_posts() {
    let source =
        ScriptedSource::new("chat-1").then_page(vec![comment("c1", "alice", "hello", at(1))]);
    let mock = MockProvider::new().with_default_reply("hi there");
    let config = PipelineConfig {
        dry_run: true,
        ..config()
    };

    let (cancel, handle) = start(&source, &mock, config, EmitMode::FinalOnly);
    wait_until(|| mock.prompts().len() == 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(source.post_attempts(), 0);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_ignored_authors_and_blank_comments_are_skipped() {
    let source = ScriptedSource::new("chat-1").then_page(vec![
        comment("c1", "bot", "my own reply", at(1)),
        comment("c2", "bob", "   ", at(2)),
        comment("c3", "alice", "real question", at(3)),
    ]);
    let mock = MockProvider::new().with_default_reply("answer");
    let config = PipelineConfig {
        ignored_author_ids: vec!["UC-bot".to_string()],
        ..config()
    };

    let (cancel, handle) = start(&source, &mock, config, EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    assert_eq!(mock.prompts(), vec!["alice says: real question".to_string()]);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_suggested_interval_is_adopted() {
    let source = ScriptedSource::new("chat-1")
        .then_page_with_interval(vec![], Some(Duration::from_secs(10)))
        .then_page(vec![comment("c1", "alice", "hello", at(1))]);
    let mock = MockProvider::new().with_default_reply("hi");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    let wait = gap(&source, 0, 1);
    assert!(wait >= Duration::from_secs(10) && wait < Duration::from_secs(11));
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_empty_poll_rearms_steady_interval() {
    let source = ScriptedSource::new("chat-1")
        .then_page(vec![])
        .then_page(vec![comment("c1", "alice", "hello", at(1))]);
    let mock = MockProvider::new().with_default_reply("hi");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    let wait = gap(&source, 0, 1);
    assert!(wait >= Duration::from_secs(5) && wait < Duration::from_secs(6));
    assert_eq!(mock.prompts().len(), 1);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_post_failures_are_not_fatal() {
    let source = ScriptedSource::new("chat-1")
        .then_page(vec![comment("c1", "alice", "one", at(1))])
        .then_page(vec![comment("c2", "bob", "two", at(2))])
        .fail_posts();
    let mock = MockProvider::new().with_default_reply("reply");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 2).await;

    assert!(source.posts().is_empty());
    assert!(!handle.is_finished());
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_punctuation_only_reply_is_suppressed() {
    let source = ScriptedSource::new("chat-1")
        .then_page(vec![comment("c1", "alice", "hmm", at(1))])
        .then_page(vec![comment("c2", "bob", "and?", at(2))]);
    let mock = MockProvider::new()
        .on_prompt("hmm")
        .respond_text("**...**")
        .on_prompt("and?")
        .respond_text("Something real");

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    wait_posts(&source, 1).await;

    assert_eq!(
        source.posts(),
        vec![("chat-1".to_string(), "Something real".to_string())]
    );
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_chunk_mode_posts_each_chunk_once() {
    let source =
        ScriptedSource::new("chat-1").then_page(vec![comment("c1", "alice", "stream it", at(1))]);
    let mock = MockProvider::new()
        .on_prompt("stream it")
        .respond_chunks(&["First part.", " Second part."]);

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::Chunks);
    wait_posts(&source, 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut texts: Vec<String> = source.posts().into_iter().map(|(_, text)| text).collect();
    texts.sort();
    assert_eq!(texts, vec!["First part.", "Second part."]);
    assert_eq!(source.post_attempts(), 2);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_chunk_mode_sanitizes_markup_split_across_chunks() {
    let source =
        ScriptedSource::new("chat-1").then_page(vec![comment("c1", "alice", "style", at(1))]);
    let mock = MockProvider::new()
        .on_prompt("style")
        .respond_chunks(&["**bo", "ld** move.", " `Ne", "xt` one"]);

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::Chunks);
    wait_posts(&source, 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut texts: Vec<String> = source.posts().into_iter().map(|(_, text)| text).collect();
    texts.sort();
    assert_eq!(texts, vec!["Next one", "bold move."]);
    assert_eq!(source.post_attempts(), 2);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_chunk_mode_drops_unfinished_sentence_on_error() {
    let source = ScriptedSource::new("chat-1").then_page(vec![
        comment("c1", "alice", "flaky", at(1)),
        comment("c2", "bob", "steady", at(2)),
    ]);
    let mock = MockProvider::new()
        .on_prompt("flaky")
        .respond_partial_then_error(
            &["Done here. Half a th"],
            ProviderError::Transport("reset".to_string()),
        )
        .on_prompt("steady")
        .respond_chunks(&["All", " good"]);

    let (cancel, handle) = start(&source, &mock, config(), EmitMode::Chunks);
    wait_posts(&source, 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut texts: Vec<String> = source.posts().into_iter().map(|(_, text)| text).collect();
    texts.sort();
    assert_eq!(texts, vec!["All good", "Done here."]);
    stop(cancel, handle).await.unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_session_open_failure_is_fatal() {
    let source = ScriptedSource::new("chat-1");
    let mock = MockProvider::new().fail_open("invalid api key");

    let (_cancel, handle) = start(&source, &mock, config(), EmitMode::FinalOnly);
    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(PipelineError::SessionOpen(_))));
    assert!(source.list_calls().is_empty());
    assert_eq!(mock.close_calls(), 0);
}
