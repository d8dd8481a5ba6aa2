//! Azure bearer tokens.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::process::Command;

use super::DirectoryError;
use crate::secret::Secret;
use crate::token::Token;

/// Tokens are refreshed this many minutes before they expire.
const EXPIRY_BUFFER_MINUTES: i64 = 5;

/// Source of Azure access tokens.
#[async_trait]
pub trait AzureCredential: Send + Sync {
    /// Get an access token for `scope` (e.g. `https://graph.microsoft.com/.default`).
    async fn access_token(&self, scope: &str) -> Result<Token, DirectoryError>;
}

/// Pre-issued access tokens, one per scope.
///
/// Entra tokens carry a single audience, so Graph and Resource Manager each
/// need their own token. Asking for a scope with no token is an error.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential {
    tokens: HashMap<String, Secret>,
}

impl StaticCredential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the token to hand out for `scope`.
    pub fn with_token(mut self, scope: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(scope.into(), Secret::new(token));
        self
    }
}

#[async_trait]
impl AzureCredential for StaticCredential {
    async fn access_token(&self, scope: &str) -> Result<Token, DirectoryError> {
        self.tokens
            .get(scope)
            .map(|token| Token::new(token.expose()))
            .ok_or_else(|| DirectoryError::Credential {
                message: format!("no access token configured for scope {}", scope),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliAccessToken {
    access_token: String,
    /// POSIX timestamp; present on Azure CLI 2.54 and later.
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

/// Credential backed by the signed-in Azure CLI (`az account get-access-token`).
///
/// Tokens are cached per scope until shortly before they expire.
#[derive(Debug)]
pub struct AzureCliCredential {
    program: String,
    cache: Mutex<HashMap<String, Token>>,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::with_program("az")
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, scope: &str) -> Option<Token> {
        let cache = self.cache.lock();
        cache
            .get(scope)
            .filter(|t| !t.expires_within(Duration::minutes(EXPIRY_BUFFER_MINUTES), Utc::now()))
            .cloned()
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AzureCredential for AzureCliCredential {
    async fn access_token(&self, scope: &str) -> Result<Token, DirectoryError> {
        if let Some(token) = self.cached(scope) {
            tracing::debug!("Using cached Azure CLI token for {}", scope);
            return Ok(token);
        }

        let output = Command::new(&self.program)
            .args(["account", "get-access-token", "--scope", scope, "--output", "json"])
            .output()
            .await
            .map_err(|e| DirectoryError::Credential {
                message: format!("cannot run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(DirectoryError::Credential {
                message: format!(
                    "{} account get-access-token failed: {}",
                    self.program,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let token = parse_cli_token(&output.stdout)?;
        tracing::debug!("Obtained Azure CLI token for {}", scope);

        self.cache.lock().insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<Token, DirectoryError> {
    let parsed: CliAccessToken =
        serde_json::from_slice(stdout).map_err(|e| DirectoryError::Credential {
            message: format!("cannot parse Azure CLI output: {}", e),
        })?;

    let mut token = Token::new(parsed.access_token);
    if let Some(expires_at) = parsed
        .expires_on
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    {
        token = token.with_expiry(expires_at);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ARM_SCOPE, GRAPH_SCOPE};

    #[test]
    fn test_parse_cli_token_with_expiry() {
        let json = br#"{
            "accessToken": "eyJ0eXAi",
            "expiresOn": "2030-01-01 12:00:00.000000",
            "expires_on": 1893499200,
            "subscription": "sub",
            "tenant": "tenant",
            "tokenType": "Bearer"
        }"#;

        let token = parse_cli_token(json).unwrap();
        assert_eq!(token.value.expose(), "eyJ0eXAi");
        assert_eq!(token.expires_at.unwrap().timestamp(), 1893499200);
    }

    #[test]
    fn test_parse_cli_token_without_expiry() {
        let token = parse_cli_token(br#"{"accessToken": "abc"}"#).unwrap();
        assert!(token.expires_at.is_none());
    }

    #[test]
    fn test_parse_cli_token_rejects_garbage() {
        let result = parse_cli_token(b"ERROR: Please run 'az login'");
        assert!(matches!(result, Err(DirectoryError::Credential { .. })));
    }

    #[tokio::test]
    async fn test_static_credential_token_per_scope() {
        let credential = StaticCredential::new()
            .with_token(GRAPH_SCOPE, "graph-token")
            .with_token(ARM_SCOPE, "arm-token");

        let graph = credential.access_token(GRAPH_SCOPE).await.unwrap();
        let arm = credential.access_token(ARM_SCOPE).await.unwrap();

        assert_eq!(graph.value.expose(), "graph-token");
        assert_eq!(arm.value.expose(), "arm-token");
    }

    #[tokio::test]
    async fn test_static_credential_unknown_scope() {
        let credential = StaticCredential::new().with_token(GRAPH_SCOPE, "graph-token");

        let result = credential.access_token(ARM_SCOPE).await;
        assert!(matches!(result, Err(DirectoryError::Credential { .. })));
    }

    #[tokio::test]
    async fn test_missing_cli_is_credential_error() {
        let credential = AzureCliCredential::with_program("/nonexistent/fedlink-az");
        let result = credential.access_token("https://graph.microsoft.com/.default").await;
        assert!(matches!(result, Err(DirectoryError::Credential { .. })));
    }
}
