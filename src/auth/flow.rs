// ABOUTME: OAuth 2.0 authorization code flow with PKCE for the YouTube Data API.
// ABOUTME: Also provides a token source that refreshes expired tokens and saves them back.

use super::callback::CallbackServer;
use super::token_store::{StoredToken, TokenStore};
use super::AccessTokenSource;
use crate::config::YouTubeConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::time::Duration;
use tokio::sync::Mutex;

/// Read chat and post messages
pub const YOUTUBE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.force-ssl",
    "https://www.googleapis.com/auth/youtube.readonly",
];

#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuthSettings {
    pub fn from_config(config: &YouTubeConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
        }
    }
}

/// Thin wrapper over the oauth2 client configured for Google
pub struct OAuthClient {
    inner: BasicClient,
}

impl OAuthClient {
    pub fn new(settings: &OAuthSettings, redirect_uri: Option<String>) -> Result<Self> {
        let mut inner = BasicClient::new(
            ClientId::new(settings.client_id.clone()),
            settings.client_secret.clone().map(ClientSecret::new),
            AuthUrl::new(settings.auth_url.clone()).context("Invalid OAuth auth_url")?,
            Some(TokenUrl::new(settings.token_url.clone()).context("Invalid OAuth token_url")?),
        )
        .set_auth_type(AuthType::RequestBody);

        if let Some(uri) = redirect_uri {
            inner = inner.set_redirect_uri(RedirectUrl::new(uri).context("Invalid redirect URI")?);
        }
        Ok(Self { inner })
    }

    /// Consent URL plus the CSRF state and PKCE verifier it was built with
    pub fn authorize_url(&self) -> (url::Url, CsrfToken, PkceCodeVerifier) {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, state) = self
            .inner
            .authorize_url(CsrfToken::new_random)
            .add_scopes(YOUTUBE_SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .set_pkce_challenge(challenge)
            // Ask for a refresh token every time
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();
        (url, state, verifier)
    }

    pub async fn exchange_code(&self, code: String, verifier: PkceCodeVerifier) -> Result<StoredToken> {
        let resp = self
            .inner
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| anyhow!("Failed to exchange authorization code: {}", e))?;
        Ok(stored_token(&resp, None))
    }

    /// Google usually omits the refresh token on refresh, so the old one is kept
    pub async fn refresh(&self, refresh_token: &str) -> Result<StoredToken> {
        let resp = self
            .inner
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| anyhow!("Failed to refresh access token: {}", e))?;
        Ok(stored_token(&resp, Some(refresh_token.to_string())))
    }
}

fn stored_token(resp: &BasicTokenResponse, previous_refresh: Option<String>) -> StoredToken {
    let expires_at = resp
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| Utc::now() + d);

    StoredToken {
        access_token: resp.access_token().secret().clone(),
        refresh_token: resp
            .refresh_token()
            .map(|t| t.secret().clone())
            .or(previous_refresh),
        token_type: "Bearer".to_string(),
        expires_at,
    }
}

/// Run the interactive login: open the consent page, wait for the redirect,
/// exchange the code, and persist the token.
pub async fn authorize(
    settings: &OAuthSettings,
    store: &TokenStore,
    port: u16,
    timeout: Duration,
) -> Result<StoredToken> {
    let server = CallbackServer::bind(port).await?;
    let client = OAuthClient::new(settings, Some(server.redirect_uri()))?;
    let (url, state, verifier) = client.authorize_url();

    println!("Opening browser for YouTube authorization...");
    if open::that(url.as_str()).is_err() {
        println!("Could not open browser. Please visit:\n{}", url);
    } else {
        println!("If the browser did not open, visit:\n{}", url);
    }

    let code = server.wait_for_code(state.secret().clone(), timeout).await?;

    println!("Exchanging code for tokens...");
    let token = client.exchange_code(code, verifier).await?;
    if token.refresh_token.is_none() {
        tracing::warn!("Authorization returned no refresh token; re-run auth when it expires");
    }
    store.save(&token)?;
    Ok(token)
}

/// Hands out the current access token, refreshing and saving it once expired
pub struct AutoSavingTokenSource {
    client: OAuthClient,
    store: TokenStore,
    current: Mutex<StoredToken>,
}

impl AutoSavingTokenSource {
    pub fn new(client: OAuthClient, store: TokenStore, token: StoredToken) -> Self {
        Self {
            client,
            store,
            current: Mutex::new(token),
        }
    }

    /// Start from the token saved by `prompter auth`
    pub fn from_store(client: OAuthClient, store: TokenStore) -> Result<Self> {
        let token = store.load()?.with_context(|| {
            format!(
                "No saved YouTube token at {}; run `prompter auth` first",
                store.path().display()
            )
        })?;
        Ok(Self::new(client, store, token))
    }
}

#[async_trait]
impl AccessTokenSource for AutoSavingTokenSource {
    async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if !current.is_expired(Utc::now()) {
            return Ok(current.access_token.clone());
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .context("Access token expired and no refresh token is saved; run `prompter auth`")?;

        tracing::info!("Refreshing YouTube access token");
        let refreshed = self.client.refresh(&refresh_token).await?;
        if let Err(e) = self.store.save(&refreshed) {
            tracing::warn!(error = %e, "Failed to save refreshed token");
        }
        *current = refreshed;
        Ok(current.access_token.clone())
    }
}
