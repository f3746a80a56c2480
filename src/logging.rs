// ABOUTME: Tracing subscriber setup - console output, optional JSON, optional rolling log file.
// ABOUTME: The returned guard must live until exit so buffered file logs are flushed.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when RUST_LOG is unset
    pub filter: String,
    pub json: bool,
    /// Directory for a daily rolling log file
    pub file_dir: Option<PathBuf>,
}

/// Keeps the file appender worker alive
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_logging(options: &LogOptions) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.filter));

    let mut layers = Vec::new();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);
    let stdout_layer = if options.json {
        stdout_layer.json().flatten_event(true).boxed()
    } else {
        stdout_layer.boxed()
    };
    layers.push(stdout_layer);

    let mut file_guard = None;
    if let Some(dir) = &options.file_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, dir, "prompter.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);

                let file_layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking);
                let file_layer = if options.json {
                    file_layer.json().flatten_event(true).boxed()
                } else {
                    file_layer.boxed()
                };
                layers.push(file_layer);
            }
            Err(e) => eprintln!("Failed to create log directory {}: {}", dir.display(), e),
        }
    }

    // try_init so tests and repeated setup do not panic
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}
