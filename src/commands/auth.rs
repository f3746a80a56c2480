// ABOUTME: `prompter auth` - interactive YouTube OAuth login.
// ABOUTME: Saves the token where `prompter run` will look for it.

use super::AuthArgs;
use crate::auth::{self, OAuthSettings, TokenStore};
use crate::config::Config;
use anyhow::Result;
use std::time::Duration;

pub async fn run(mut config: Config, args: AuthArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate_for_auth()?;

    let store = TokenStore::new(config.token_path());
    let settings = OAuthSettings::from_config(&config.youtube);
    let timeout = Duration::from_secs(config.youtube.auth_timeout_secs);

    tracing::info!(
        port = config.youtube.oauth_port,
        token_path = %store.path().display(),
        "Starting YouTube authorization"
    );
    let token = auth::authorize(&settings, &store, config.youtube.oauth_port, timeout).await?;

    tracing::info!(expires_at = ?token.expires_at, "Authorization complete");
    println!("Saved YouTube token to {}", store.path().display());
    Ok(())
}
