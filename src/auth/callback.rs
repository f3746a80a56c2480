// ABOUTME: One-shot local HTTP server that receives the OAuth redirect.
// ABOUTME: Checks the state parameter and hands the authorization code back to the login flow.

use anyhow::{anyhow, bail, Result};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

struct CallbackState {
    expected_state: String,
    tx: Mutex<Option<oneshot::Sender<std::result::Result<String, String>>>>,
}

/// Listens on `127.0.0.1:{port}` for a GET `/callback`
pub struct CallbackServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackServer {
    /// Bind before building the redirect URI so port 0 resolves to a real port
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| anyhow!("Failed to bind OAuth callback port {}: {}", port, e))?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.addr.port())
    }

    /// Serve until one callback arrives or `timeout` elapses
    pub async fn wait_for_code(self, expected_state: String, timeout: Duration) -> Result<String> {
        let Self { listener, addr } = self;
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state,
            tx: Mutex::new(Some(tx)),
        });

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
            }
        });

        tracing::info!(addr = %addr, "Waiting for OAuth callback");
        let outcome = tokio::time::timeout(timeout, rx).await;
        shutdown.cancel();
        let _ = server.await;

        match outcome {
            Ok(Ok(Ok(code))) => Ok(code),
            Ok(Ok(Err(reason))) => bail!("OAuth callback failed: {}", reason),
            Ok(Err(_)) => bail!("OAuth callback server stopped unexpectedly"),
            Err(_) => bail!("OAuth callback timed out after {}s", timeout.as_secs()),
        }
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let result = check_params(&state.expected_state, params);
    let page = match &result {
        Ok(_) => "<h1>Authentication successful!</h1><p>You can close this window.</p>",
        Err(reason) => {
            tracing::warn!(reason = %reason, "OAuth callback rejected");
            "<h1>Authentication failed</h1><p>Check the terminal for details.</p>"
        }
    };

    let tx = state.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(tx) = tx {
        let _ = tx.send(result);
    }
    Html(page)
}

fn check_params(expected_state: &str, params: CallbackParams) -> std::result::Result<String, String> {
    if let Some(error) = params.error {
        return Err(format!("authorization denied: {}", error));
    }
    match params.state.as_deref() {
        Some(s) if s == expected_state => {}
        Some(_) => return Err("state mismatch".to_string()),
        None => return Err("missing state".to_string()),
    }
    params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| "missing code".to_string())
}
