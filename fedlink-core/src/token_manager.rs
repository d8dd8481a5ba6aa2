//! GitHub App installation token management.
//!
//! This module provides [`InstallationTokenManager`], a [`TokenSource`] that
//! authenticates as a GitHub App installation:
//!
//! 1. Mint a short-lived RS256 assertion signed with the App's private key
//! 2. Exchange it at `/app/installations/{id}/access_tokens`
//! 3. Cache the resulting installation token until shortly before it expires
//!
//! # Features
//!
//! - Lazy reuse of the cached token (one exchange per expiry window)
//! - Single-flight refresh: concurrent callers wait on the same cache entry
//! - Injectable [`Clock`] so expiry can be tested without sleeping
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use fedlink_core::token_manager::{GitHubAppConfig, InstallationTokenManager};
//! use fedlink_core::TokenSource;
//!
//! let app = GitHubAppConfig::new("12345", "67890", "/etc/fedlink/app.pem");
//! let manager = InstallationTokenManager::new(app);
//!
//! let token = manager.get_token().await?;
//! println!("token expires at {:?}", token.expires_at);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::Duration;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use crate::{
    clock::{Clock, SystemClock},
    http::{self, DEFAULT_TIMEOUT},
    secret::Secret,
    token::{Token, TokenError, TokenSource},
};

/// Public GitHub REST API root.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Seconds before expiry at which a cached token is no longer handed out.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Backdating of the assertion's `iat`, for servers whose clock runs slightly behind.
const ASSERTION_BACKDATE_SECS: i64 = 60;

/// Lifetime of the signed assertion. It only proves identity for the exchange.
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Assumed lifetime of an installation token.
///
/// GitHub declares an `expires_at` in the exchange response; it is deliberately
/// not read. Installation tokens live one hour.
const INSTALLATION_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Identity of a GitHub App installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAppConfig {
    /// Numeric App id, used as the assertion issuer.
    pub app_id: String,

    /// Installation to obtain tokens for.
    pub installation_id: String,

    /// PEM-encoded RSA private key of the App.
    pub private_key_path: PathBuf,

    /// REST API root.
    pub api_url: Url,
}

impl GitHubAppConfig {
    /// Create a configuration against the public GitHub API.
    pub fn new(
        app_id: impl Into<String>,
        installation_id: impl Into<String>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            installation_id: installation_id.into(),
            private_key_path: private_key_path.into(),
            api_url: default_api_url(),
        }
    }

    /// Point the configuration at a different API root (GHES or a test server).
    pub fn with_api_url(mut self, api_url: Url) -> Self {
        self.api_url = api_url;
        self
    }
}

/// The public GitHub API root as a [`Url`].
pub fn default_api_url() -> Url {
    Url::parse(GITHUB_API_URL).expect("static GitHub API URL is valid")
}

/// Claims of the App assertion.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
}

/// Token source for a GitHub App installation.
///
/// Holds a single cached installation token. Refreshes hold the cache lock for
/// the whole exchange so at most one exchange runs per expiry window, even
/// when the manager is shared between tasks.
pub struct InstallationTokenManager {
    app: GitHubAppConfig,
    http_client: reqwest::Client,
    clock: Arc<dyn Clock>,
    expiry_buffer: Duration,
    cache: Mutex<Option<Token>>,
}

impl InstallationTokenManager {
    /// Create a new token manager using wall-clock time.
    pub fn new(app: GitHubAppConfig) -> Self {
        Self::with_clock(app, Arc::new(SystemClock))
    }

    /// Create a new token manager with a custom clock.
    pub fn with_clock(app: GitHubAppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            app,
            http_client: http::build_client(DEFAULT_TIMEOUT),
            clock,
            expiry_buffer: Duration::seconds(EXPIRY_BUFFER_SECS),
            cache: Mutex::new(None),
        }
    }

    /// Replace the HTTP client (e.g. to change the transport timeout).
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Load the App's signing key from disk.
    async fn load_signing_key(&self) -> Result<EncodingKey, TokenError> {
        let path = &self.app.private_key_path;
        let pem = tokio::fs::read(path)
            .await
            .map_err(|e| TokenError::AuthConfig {
                message: format!("cannot read private key {}: {}", path.display(), e),
            })?;

        EncodingKey::from_rsa_pem(&pem).map_err(|e| TokenError::AuthConfig {
            message: format!("cannot parse private key {}: {}", path.display(), e),
        })
    }

    /// Mint a signed assertion proving the App's identity.
    async fn mint_assertion(&self) -> Result<Secret, TokenError> {
        let key = self.load_signing_key().await?;
        let now = self.clock.now().timestamp();

        let claims = AssertionClaims {
            iat: now - ASSERTION_BACKDATE_SECS,
            exp: now + ASSERTION_LIFETIME_SECS,
            iss: self.app.app_id.clone(),
        };

        let jwt = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(
            |e| TokenError::AuthConfig {
                message: format!("cannot sign assertion: {}", e),
            },
        )?;

        Ok(Secret::new(jwt))
    }

    /// Exchange a fresh assertion for an installation token.
    async fn exchange(&self) -> Result<Token, TokenError> {
        let assertion = self.mint_assertion().await?;
        let url = http::endpoint(
            &self.app.api_url,
            &format!("app/installations/{}/access_tokens", self.app.installation_id),
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(assertion.expose())
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::TokenExchange {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidResponse {
                message: format!("cannot decode access token response: {}", e),
            })?;

        let expires_at = self.clock.now() + Duration::seconds(INSTALLATION_TOKEN_LIFETIME_SECS);
        Ok(Token::new(body.token).with_expiry(expires_at))
    }
}

impl std::fmt::Debug for InstallationTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenManager")
            .field("app_id", &self.app.app_id)
            .field("installation_id", &self.app.installation_id)
            .field("api_url", &self.app.api_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for InstallationTokenManager {
    async fn get_token(&self) -> Result<Token, TokenError> {
        let mut cache = self.cache.lock().await;

        if let Some(token) = cache.as_ref() {
            if !token.expires_within(self.expiry_buffer, self.clock.now()) {
                tracing::debug!(
                    "Using cached installation token for installation {}",
                    self.app.installation_id
                );
                return Ok(token.clone());
            }
            tracing::info!(
                "Installation token for installation {} is about to expire, refreshing",
                self.app.installation_id
            );
        }

        let token = self.exchange().await.inspect_err(|e| {
            tracing::error!(
                "Failed to obtain installation token for installation {}: {}",
                self.app.installation_id,
                e
            );
        })?;

        tracing::info!(
            "Obtained installation token for installation {}",
            self.app.installation_id
        );
        *cache = Some(token.clone());
        Ok(token)
    }
}
