// ABOUTME: Metric names and recording helpers for the relay pipeline.
// ABOUTME: Uses the metrics facade; the binary decides whether an exporter is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

pub const COMMENTS_RECEIVED: &str = "prompter_comments_received_total";
pub const EXCHANGES: &str = "prompter_exchanges_total";
pub const EXCHANGE_DURATION: &str = "prompter_exchange_duration_seconds";
pub const POSTS: &str = "prompter_posts_total";
pub const POLL_ERRORS: &str = "prompter_poll_errors_total";
pub const REDISCOVERIES: &str = "prompter_rediscoveries_total";

/// Register descriptions with whatever recorder is installed
pub fn describe_metrics() {
    describe_counter!(COMMENTS_RECEIVED, "New chat comments returned by the poller");
    describe_counter!(EXCHANGES, "AI exchanges by outcome");
    describe_histogram!(EXCHANGE_DURATION, "Time from submit to terminal event");
    describe_counter!(POSTS, "Reply posts by status (sent, failed, suppressed, dry_run)");
    describe_counter!(POLL_ERRORS, "Failed poll attempts by kind");
    describe_counter!(REDISCOVERIES, "Waits for a new live chat after the previous one ended");
}

pub fn record_comments_received(count: usize) {
    counter!(COMMENTS_RECEIVED).increment(count as u64);
}

pub fn record_exchange(outcome: &'static str, duration: Duration) {
    counter!(EXCHANGES, "outcome" => outcome).increment(1);
    histogram!(EXCHANGE_DURATION).record(duration.as_secs_f64());
}

pub fn record_post(status: &'static str) {
    counter!(POSTS, "status" => status).increment(1);
}

pub fn record_poll_error(kind: &'static str) {
    counter!(POLL_ERRORS, "kind" => kind).increment(1);
}

pub fn record_rediscovery() {
    counter!(REDISCOVERIES).increment(1);
}
