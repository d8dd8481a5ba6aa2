//! Bearer tokens used against GitHub and Azure.
//!
//! This module provides:
//! - [`Token`] - A bearer token with its expiry
//! - [`TokenError`] - Failures while loading keys or obtaining tokens
//! - [`TokenSource`] - Trait for anything that can hand out a valid bearer token
//! - [`StaticToken`] - A fixed token, for pre-issued credentials and tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::Secret;

/// Error type for token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The signing key could not be read or parsed.
    #[error("auth configuration error: {message}")]
    AuthConfig { message: String },

    /// The token endpoint answered with a non-success status.
    #[error("token exchange failed with status {status}: {message}")]
    TokenExchange { status: u16, message: String },

    /// The token endpoint answered with something we could not use.
    #[error("invalid token response: {message}")]
    InvalidResponse { message: String },

    /// Network error while talking to the token endpoint.
    #[error("network error: {message}")]
    Network { message: String },
}

impl From<reqwest::Error> for TokenError {
    fn from(e: reqwest::Error) -> Self {
        TokenError::Network {
            message: e.to_string(),
        }
    }
}

/// A bearer token with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// The token value.
    pub value: Secret,

    /// When this token expires (None if unknown or non-expiring).
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Create a new token with no known expiry.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Secret::new(value),
            expires_at: None,
        }
    }

    /// Create a token with an expiration time.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if this token will expire within `buffer` of `now`.
    ///
    /// A token is unusable once `now >= expires_at - buffer`.
    pub fn expires_within(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|exp| now >= exp - buffer)
            .unwrap_or(false)
    }
}

/// Something that hands out a currently valid bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Get a valid token, refreshing if necessary.
    async fn get_token(&self) -> Result<Token, TokenError>;
}

/// A token source that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticToken(Token);

impl StaticToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Token::new(value))
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn get_token(&self) -> Result<Token, TokenError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expires_within() {
        let now = Utc::now();
        let token = Token::new("test").with_expiry(now + Duration::minutes(5));

        assert!(token.expires_within(Duration::minutes(10), now));
        assert!(!token.expires_within(Duration::minutes(2), now));
        // Boundary is inclusive: exactly `buffer` before expiry is already stale.
        assert!(token.expires_within(Duration::minutes(5), now));
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken::new("fixed");
        let token = source.get_token().await.unwrap();
        assert_eq!(token.value.expose(), "fixed");
        assert!(token.expires_at.is_none());
    }
}
