// ABOUTME: `prompter run` - wires the YouTube source, AI provider, and pipeline together.
// ABOUTME: Ctrl-C cancels the pipeline; a graceful shutdown counts as success.

use super::RunArgs;
use crate::auth::{AutoSavingTokenSource, OAuthClient, OAuthSettings, TokenStore};
use crate::config::Config;
use crate::telemetry;
use crate::youtube::YouTubeSource;
use anyhow::{Context, Result};
use prompter_agent::{EmitMode, ProviderRegistry, SessionOptions, SessionSpec};
use prompter_core::{ChatSource, PipelineOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(mut config: Config, args: RunArgs) -> Result<()> {
    args.apply(&mut config)?;
    config.validate_for_run()?;

    let mut pipeline = config.pipeline_config();
    if let Some(interval) = args.poll_interval {
        pipeline.poll_interval = interval;
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C, shutting down");
                cancel.cancel();
            }
        }
    });

    if let Some(addr) = config.metrics.listen.clone() {
        let handle = telemetry::init_metrics()?;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = telemetry::serve(&addr, handle, cancel).await {
                tracing::error!(error = %e, "Metrics server stopped");
            }
        });
    }

    let provider = ProviderRegistry::default()
        .create_from_settings(&config.provider_settings())
        .with_context(|| format!("Failed to create AI provider '{}'", config.ai.provider))?;
    let source = build_source(&config)?;

    let spec = SessionSpec::new(&config.ai.model)
        .with_system_instruction(config.system_instruction());
    let emit = if config.ai.emit_chunks {
        EmitMode::Chunks
    } else {
        EmitMode::FinalOnly
    };

    tracing::info!(
        channel_id = %config.youtube.channel_id,
        provider = %config.ai.provider,
        model = %config.ai.model,
        poll_interval = ?pipeline.poll_interval,
        dry_run = pipeline.dry_run,
        "Starting pipeline"
    );

    let orchestrator = PipelineOrchestrator::new(source, provider, spec, pipeline)
        .with_session_options(SessionOptions {
            emit,
            ..Default::default()
        });

    match orchestrator.run(cancel).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => {
            tracing::info!("Pipeline stopped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn build_source(config: &Config) -> Result<Arc<dyn ChatSource>> {
    let settings = OAuthSettings::from_config(&config.youtube);
    let client = OAuthClient::new(&settings, None)?;
    let tokens = AutoSavingTokenSource::from_store(client, TokenStore::new(config.token_path()))?;

    let source = YouTubeSource::new(
        config.youtube.channel_id.clone(),
        Arc::new(tokens),
        Duration::from_secs(config.youtube.request_timeout_secs),
    )?
    .with_base_url(config.youtube.api_base_url.clone());
    Ok(Arc::new(source))
}
