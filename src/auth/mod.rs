// ABOUTME: YouTube OAuth support - token persistence, the PKCE login flow, and token sources.
// ABOUTME: The YouTube client asks an AccessTokenSource for a bearer token before every call.

mod callback;
mod flow;
mod token_store;

pub use callback::CallbackServer;
pub use flow::{authorize, AutoSavingTokenSource, OAuthClient, OAuthSettings, YOUTUBE_SCOPES};
pub use token_store::{StoredToken, TokenStore};

use anyhow::Result;
use async_trait::async_trait;

/// Supplies a valid bearer token for API calls
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for tests and short-lived scripts
#[derive(Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
