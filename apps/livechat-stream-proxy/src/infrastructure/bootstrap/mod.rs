//! Bootstrap
//!
//! Turns the configured credential into an upstream capability. An API key
//! is available immediately; an OAuth token source arrives once, later,
//! from the external token workflow over a oneshot channel. Setup runs in
//! the background so subscribers can register while it waits: their
//! pollers start as soon as the capability is installed, and a failed
//! setup is reported once on the emitter's error stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::infrastructure::config::{AuthMode, ProxyConfig};
use crate::infrastructure::emitter::{ChatEmitter, EmitterError};
use crate::infrastructure::youtube::{YouTubeClient, YouTubeClientConfig};

// =============================================================================
// Errors
// =============================================================================

/// Errors while building the upstream capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// API key mode without a key.
    #[error("no API key configured")]
    MissingApiKey,

    /// The token workflow went away without delivering a token source.
    #[error("OAuth token source was never delivered")]
    TokenSourceClosed,

    /// The token source could not produce a token.
    #[error("OAuth token unavailable: {0}")]
    Token(String),

    /// The HTTP client could not be built.
    #[error("failed to build upstream client: {0}")]
    Client(String),
}

// =============================================================================
// Credentials
// =============================================================================

/// Source of OAuth bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current access token.
    async fn token(&self) -> Result<String, SetupError>;
}

/// A fixed access token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, SetupError> {
        if self.0.is_empty() {
            return Err(SetupError::Token("empty access token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Credential used by the upstream client.
#[derive(Clone)]
pub enum Credential {
    /// Static API key, sent as the `key` query parameter.
    ApiKey(String),
    /// OAuth token source, sent as a bearer token.
    OAuth(Arc<dyn TokenSource>),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Self::OAuth(_) => f.write_str("OAuth(..)"),
        }
    }
}

/// Delivery channel for the OAuth token source.
pub type TokenSourceReceiver = oneshot::Receiver<Arc<dyn TokenSource>>;

/// Acquire the credential for the configured auth mode.
///
/// In OAuth mode this waits for the single delivery on `oauth_rx`.
///
/// # Errors
///
/// Returns an error if the API key is missing or the token source is
/// never delivered.
pub async fn acquire(
    config: &ProxyConfig,
    oauth_rx: TokenSourceReceiver,
) -> Result<Credential, SetupError> {
    match config.auth_mode {
        AuthMode::ApiKey => config
            .credentials
            .api_key()
            .filter(|key| !key.is_empty())
            .map(|key| Credential::ApiKey(key.to_string()))
            .ok_or(SetupError::MissingApiKey),
        AuthMode::OAuth => {
            tracing::info!("Waiting for OAuth token source");
            let source = oauth_rx.await.map_err(|_| SetupError::TokenSourceClosed)?;
            source.token().await?;
            Ok(Credential::OAuth(source))
        }
    }
}

/// Acquire the credential and build the upstream client.
///
/// # Errors
///
/// Returns an error if either step fails.
pub async fn setup(
    config: &ProxyConfig,
    oauth_rx: TokenSourceReceiver,
) -> Result<YouTubeClient, SetupError> {
    let credential = acquire(config, oauth_rx).await?;
    YouTubeClient::new(&YouTubeClientConfig::from(config), credential)
        .map_err(|e| SetupError::Client(e.to_string()))
}

/// Run [`setup`] in the background and install the result on `emitter`.
///
/// A failure is reported exactly once on the emitter's error stream.
pub fn spawn_setup(
    emitter: Arc<ChatEmitter>,
    config: ProxyConfig,
    oauth_rx: TokenSourceReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match setup(&config, oauth_rx).await {
            Ok(client) => {
                tracing::info!(auth_mode = config.auth_mode.as_str(), "Upstream client ready");
                emitter.set_capability(Arc::new(client));
            }
            Err(e) => {
                tracing::error!(error = %e, "Upstream setup failed");
                emitter.report_error(EmitterError::Setup(e));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::Credentials;

    fn config(auth_mode: AuthMode, api_key: Option<&str>) -> ProxyConfig {
        ProxyConfig {
            auth_mode,
            credentials: Credentials::new(api_key.map(str::to_string), None),
            api_base_url: "http://127.0.0.1:9".to_string(),
            channels: Vec::new(),
            polling: crate::infrastructure::config::PollingSettings::default(),
            dispatch: crate::infrastructure::config::DispatchSettings::default(),
            channel: crate::infrastructure::config::ChannelSettings::default(),
            server: crate::infrastructure::config::ServerSettings::default(),
        }
    }

    #[tokio::test]
    async fn api_key_is_immediate() {
        let (_tx, rx) = oneshot::channel();
        let credential = acquire(&config(AuthMode::ApiKey, Some("k")), rx).await;
        assert!(matches!(credential, Ok(Credential::ApiKey(key)) if key == "k"));
    }

    #[tokio::test]
    async fn missing_api_key_fails() {
        let (_tx, rx) = oneshot::channel();
        let credential = acquire(&config(AuthMode::ApiKey, None), rx).await;
        assert_eq!(credential.unwrap_err(), SetupError::MissingApiKey);
    }

    #[tokio::test]
    async fn oauth_waits_for_delivery() {
        let (tx, rx) = oneshot::channel::<Arc<dyn TokenSource>>();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = tx.send(Arc::new(StaticToken::new("tok")));
        });

        let credential = acquire(&config(AuthMode::OAuth, None), rx).await.unwrap();
        let Credential::OAuth(source) = credential else {
            panic!("expected OAuth credential");
        };
        assert_eq!(source.token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn dropped_token_workflow_fails() {
        let (tx, rx) = oneshot::channel::<Arc<dyn TokenSource>>();
        drop(tx);
        let credential = acquire(&config(AuthMode::OAuth, None), rx).await;
        assert_eq!(credential.unwrap_err(), SetupError::TokenSourceClosed);
    }

    #[test]
    fn credential_debug_is_redacted() {
        let debug = format!("{:?}", Credential::ApiKey("secret".to_string()));
        assert!(!debug.contains("secret"));
        let debug = format!("{:?}", StaticToken::new("secret"));
        assert!(!debug.contains("secret"));
    }
}
