// ABOUTME: Prometheus exporter for the pipeline metrics.
// ABOUTME: Installs the global recorder and serves GET /metrics until cancelled.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Install the Prometheus recorder and register metric descriptions
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    prompter_core::metrics::describe_metrics();
    Ok(handle)
}

pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(handle))
}

/// Serve `/metrics` on `addr` until `cancel` fires
pub async fn serve(addr: &str, handle: PrometheusHandle, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
    tracing::info!(addr = %addr, "Serving Prometheus metrics");

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Metrics server failed")
}

/// Handle GET /metrics - returns Prometheus text format
async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
