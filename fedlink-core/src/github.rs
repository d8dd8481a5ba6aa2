//! GitHub repository checks and Actions secret publishing.
//!
//! This module provides:
//! - [`RepositorySecretPublisher`] - Checks repositories, lists secret names and
//!   upserts sealed secret values
//! - [`RepositoryStatus`] - Classification of a repository existence check
//! - [`RemoteSecretKey`] - A repository's secret-encryption public key
//! - [`PublishOutcome`] - Result of writing one secret
//!
//! Requests authenticate with a bearer token from any [`TokenSource`], usually
//! an [`InstallationTokenManager`](crate::token_manager::InstallationTokenManager)
//! shared across all repositories of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::{
    http::{self, DEFAULT_TIMEOUT},
    model::RepositoryRef,
    seal::{SealError, SecretSealer},
    token::{TokenError, TokenSource},
    token_manager::default_api_url,
};

/// Page size used when listing secrets (GitHub's maximum).
const SECRETS_PAGE_SIZE: usize = 100;

/// Error type for repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// No installation token could be obtained.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// The value could not be sealed for the repository key.
    #[error("seal error: {0}")]
    Seal(#[from] SealError),

    /// A query against the repository failed.
    #[error("lookup of {resource} failed (status {status:?}): {message}")]
    ResourceLookup {
        resource: String,
        status: Option<u16>,
        message: String,
    },

    /// Network error while talking to GitHub.
    #[error("network error: {message}")]
    Network { message: String },
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        RepoError::Network {
            message: e.to_string(),
        }
    }
}

/// Classification of a repository existence check.
///
/// `exists` is `None` when the answer could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub exists: Option<bool>,
    pub accessible: bool,
    pub private: Option<bool>,
    pub message: String,
}

impl RepositoryStatus {
    /// Whether secrets can be published to this repository.
    pub fn is_reachable(&self) -> bool {
        self.exists == Some(true) && self.accessible
    }
}

/// A repository's public key for Actions secrets.
///
/// Fetched per repository on every publish; keys rotate independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSecretKey {
    pub key_id: String,
    /// Base64-encoded Curve25519 public key.
    pub key: String,
}

/// Result of writing one secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// HTTP 201: the secret did not exist.
    Created,
    /// HTTP 204: an existing secret was overwritten.
    Updated,
    /// The secret was not written.
    Failed { reason: String },
}

#[derive(Debug, Deserialize)]
struct RepositoryBody {
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct SecretEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SecretList {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    secrets: Vec<SecretEntry>,
}

#[derive(Debug, Serialize)]
struct SecretWrite<'a> {
    encrypted_value: &'a str,
    key_id: &'a str,
}

/// Publishes sealed Actions secrets into GitHub repositories.
pub struct RepositorySecretPublisher {
    http_client: reqwest::Client,
    api_url: Url,
    tokens: Arc<dyn TokenSource>,
    sealer: SecretSealer,
}

impl RepositorySecretPublisher {
    /// Create a publisher against the public GitHub API.
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_api_url(tokens, default_api_url())
    }

    /// Create a publisher against a custom API root (GHES, tests).
    pub fn with_api_url(tokens: Arc<dyn TokenSource>, api_url: Url) -> Self {
        Self {
            http_client: http::build_client(DEFAULT_TIMEOUT),
            api_url,
            tokens,
            sealer: SecretSealer::new(),
        }
    }

    /// Replace the HTTP client (e.g. to change the transport timeout).
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, RepoError> {
        let token = self.tokens.get_token().await?;
        Ok(self
            .http_client
            .request(method, http::endpoint(&self.api_url, path))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {}", token.value.expose()),
            )
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json"))
    }

    /// Check whether `repo` exists and is accessible to the installation.
    ///
    /// Never fails: transport and token errors classify as unknown.
    pub async fn check_repository(&self, repo: &RepositoryRef) -> RepositoryStatus {
        let path = format!("repos/{}/{}", repo.owner, repo.name);
        let response = match self.request(reqwest::Method::GET, &path).await {
            Ok(builder) => builder.send().await.map_err(RepoError::from),
            Err(e) => Err(e),
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return RepositoryStatus {
                    exists: None,
                    accessible: false,
                    private: None,
                    message: format!("Error checking repository: {}", e),
                };
            }
        };

        match response.status().as_u16() {
            200 => {
                let private = response
                    .json::<RepositoryBody>()
                    .await
                    .map(|body| body.private)
                    .unwrap_or(false);
                RepositoryStatus {
                    exists: Some(true),
                    accessible: true,
                    private: Some(private),
                    message: format!("Repository {} exists and is accessible", repo),
                }
            }
            404 => RepositoryStatus {
                exists: Some(false),
                accessible: false,
                private: None,
                message: format!("Repository {} does not exist or is not accessible", repo),
            },
            403 => RepositoryStatus {
                exists: Some(true),
                accessible: false,
                private: Some(true),
                message: format!("Repository {} exists but access is forbidden", repo),
            },
            status => {
                let body = response.text().await.unwrap_or_default();
                RepositoryStatus {
                    exists: None,
                    accessible: false,
                    private: None,
                    message: format!("Unexpected response: {} - {}", status, body),
                }
            }
        }
    }

    /// List Actions secret names, failing on any error.
    pub async fn list_repository_secrets(
        &self,
        repo: &RepositoryRef,
    ) -> Result<Vec<String>, RepoError> {
        let path = format!("repos/{}/{}/actions/secrets", repo.owner, repo.name);
        let mut names = Vec::new();
        let mut page = 1usize;

        loop {
            let response = self
                .request(reqwest::Method::GET, &path)
                .await?
                .query(&[("per_page", SECRETS_PAGE_SIZE), ("page", page)])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RepoError::ResourceLookup {
                    resource: format!("secrets of {}", repo),
                    status: Some(status.as_u16()),
                    message: body,
                });
            }

            let list: SecretList = response.json().await.map_err(|e| RepoError::ResourceLookup {
                resource: format!("secrets of {}", repo),
                status: None,
                message: format!("cannot decode response: {}", e),
            })?;

            let received = list.secrets.len();
            names.extend(list.secrets.into_iter().map(|s| s.name));

            if received < SECRETS_PAGE_SIZE || names.len() >= list.total_count {
                break;
            }
            page += 1;
        }

        tracing::debug!("Secrets in {}: {:?}", repo, names);
        Ok(names)
    }

    /// List Actions secret names, returning an empty set on any error.
    pub async fn list_secret_names(&self, repo: &RepositoryRef) -> BTreeSet<String> {
        match self.list_repository_secrets(repo).await {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Error getting existing secrets for {}: {}", repo, e);
                BTreeSet::new()
            }
        }
    }

    /// Fetch the repository's secret-encryption public key.
    pub async fn fetch_public_key(
        &self,
        repo: &RepositoryRef,
    ) -> Result<RemoteSecretKey, RepoError> {
        let path = format!("repos/{}/{}/actions/secrets/public-key", repo.owner, repo.name);
        let response = self.request(reqwest::Method::GET, &path).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepoError::ResourceLookup {
                resource: format!("public key of {}", repo),
                status: Some(status.as_u16()),
                message: body,
            });
        }

        response.json().await.map_err(|e| RepoError::ResourceLookup {
            resource: format!("public key of {}", repo),
            status: None,
            message: format!("cannot decode response: {}", e),
        })
    }

    async fn try_publish(
        &self,
        repo: &RepositoryRef,
        name: &str,
        value: &str,
    ) -> Result<PublishOutcome, RepoError> {
        let key = self.fetch_public_key(repo).await?;
        let encrypted_value = self.sealer.seal(&key.key, value)?;

        let path = format!("repos/{}/{}/actions/secrets/{}", repo.owner, repo.name, name);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .await?
            .json(&SecretWrite {
                encrypted_value: &encrypted_value,
                key_id: &key.key_id,
            })
            .send()
            .await?;

        Ok(match response.status().as_u16() {
            201 => PublishOutcome::Created,
            204 => PublishOutcome::Updated,
            status => {
                let body = response.text().await.unwrap_or_default();
                PublishOutcome::Failed {
                    reason: format!("status {}: {}", status, body),
                }
            }
        })
    }

    /// Create or update the Actions secret `name` in `repo`.
    ///
    /// Never fails: errors are logged and reported as [`PublishOutcome::Failed`].
    pub async fn publish(&self, repo: &RepositoryRef, name: &str, value: &str) -> PublishOutcome {
        let outcome = self
            .try_publish(repo, name, value)
            .await
            .unwrap_or_else(|e| PublishOutcome::Failed {
                reason: e.to_string(),
            });

        match &outcome {
            PublishOutcome::Created => {
                tracing::info!("Secret '{}' created successfully in {}", name, repo)
            }
            PublishOutcome::Updated => {
                tracing::info!("Secret '{}' updated successfully in {}", name, repo)
            }
            PublishOutcome::Failed { reason } => {
                tracing::error!("Error creating secret '{}' in {}: {}", name, repo, reason)
            }
        }
        outcome
    }
}

impl std::fmt::Debug for RepositorySecretPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySecretPublisher")
            .field("api_url", &self.api_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_status_reachability() {
        let reachable = RepositoryStatus {
            exists: Some(true),
            accessible: true,
            private: Some(false),
            message: String::new(),
        };
        assert!(reachable.is_reachable());

        let forbidden = RepositoryStatus {
            exists: Some(true),
            accessible: false,
            private: Some(true),
            message: String::new(),
        };
        assert!(!forbidden.is_reachable());

        let unknown = RepositoryStatus {
            exists: None,
            accessible: false,
            private: None,
            message: String::new(),
        };
        assert!(!unknown.is_reachable());
    }

    #[test]
    fn test_secret_list_decodes() {
        let json = r#"{"total_count":2,"secrets":[{"name":"CLIENT_ID","created_at":"2024-01-01T00:00:00Z"},{"name":"TENANT_ID"}]}"#;
        let list: SecretList = serde_json::from_str(json).unwrap();
        assert_eq!(list.total_count, 2);
        assert_eq!(list.secrets[1].name, "TENANT_ID");
    }
}
