//! Microsoft Graph directory backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use super::{AzureCredential, DirectoryClient, DirectoryError, lookup_error, write_error};
use crate::http::{self, DEFAULT_TIMEOUT};
use crate::model::{Application, FederationTrust, RuntimeIdentity};

/// Microsoft Graph v1.0 root.
pub const GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";

/// Token scope for Microsoft Graph.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewApplication<'a> {
    display_name: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewServicePrincipal<'a> {
    app_id: &'a str,
}

#[derive(Debug, Serialize)]
struct NewFederatedCredential<'a> {
    name: &'a str,
    issuer: &'a str,
    subject: &'a str,
    audiences: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// [`DirectoryClient`] backed by Microsoft Graph.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: Url,
    credential: Arc<dyn AzureCredential>,
}

impl GraphClient {
    /// Create a client against the public Graph endpoint.
    pub fn new(credential: Arc<dyn AzureCredential>) -> Self {
        let base_url = Url::parse(GRAPH_URL).expect("static Graph URL is valid");
        Self::with_base_url(credential, base_url)
    }

    /// Create a client against a custom root (sovereign clouds, tests).
    pub fn with_base_url(credential: Arc<dyn AzureCredential>, base_url: Url) -> Self {
        Self {
            http_client: http::build_client(DEFAULT_TIMEOUT),
            base_url,
            credential,
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
    ) -> Result<reqwest::RequestBuilder, DirectoryError> {
        let token = self.credential.access_token(GRAPH_SCOPE).await?;
        Ok(self
            .http_client
            .request(method, http::endpoint(&self.base_url, path))
            .bearer_auth(token.value.expose()))
    }
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Quote a value for an OData string literal.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl DirectoryClient for GraphClient {
    async fn find_application(
        &self,
        display_name: &str,
    ) -> Result<Option<Application>, DirectoryError> {
        let filter = format!("displayName eq {}", odata_literal(display_name));
        let response = self
            .request(reqwest::Method::GET, "applications")
            .await?
            .query(&[("$filter", filter.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(lookup_error(&format!("application {}", display_name), response).await);
        }

        let apps: ODataList<Application> = response
            .json()
            .await
            .map_err(|e| DirectoryError::ResourceLookup {
                resource: format!("application {}", display_name),
                message: format!("cannot decode response: {}", e),
            })?;

        Ok(apps
            .value
            .into_iter()
            .find(|app| app.display_name == display_name))
    }

    async fn create_application(
        &self,
        display_name: &str,
        description: &str,
    ) -> Result<Application, DirectoryError> {
        let resource = format!("application {}", display_name);
        let response = self
            .request(reqwest::Method::POST, "applications")
            .await?
            .json(&NewApplication {
                display_name,
                description,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(write_error(&resource, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| DirectoryError::RemoteWrite {
                resource,
                status: None,
                message: format!("cannot decode response: {}", e),
            })
    }

    async fn create_service_principal(
        &self,
        app_client_id: &str,
    ) -> Result<RuntimeIdentity, DirectoryError> {
        let resource = format!("service principal for {}", app_client_id);
        let response = self
            .request(reqwest::Method::POST, "servicePrincipals")
            .await?
            .json(&NewServicePrincipal {
                app_id: app_client_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(write_error(&resource, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| DirectoryError::RemoteWrite {
                resource,
                status: None,
                message: format!("cannot decode response: {}", e),
            })
    }

    async fn list_federation_trusts(
        &self,
        app_object_id: &str,
    ) -> Result<Vec<FederationTrust>, DirectoryError> {
        let path = format!("applications/{}/federatedIdentityCredentials", app_object_id);
        let response = self.request(reqwest::Method::GET, &path).await?.send().await?;

        if !response.status().is_success() {
            return Err(lookup_error("federated identity credentials", response).await);
        }

        let trusts: ODataList<FederationTrust> = response
            .json()
            .await
            .map_err(|e| DirectoryError::ResourceLookup {
                resource: "federated identity credentials".to_string(),
                message: format!("cannot decode response: {}", e),
            })?;

        Ok(trusts.value)
    }

    async fn create_federation_trust(
        &self,
        app_object_id: &str,
        trust: &FederationTrust,
    ) -> Result<FederationTrust, DirectoryError> {
        let resource = format!("federated credential {}", trust.name);
        let path = format!("applications/{}/federatedIdentityCredentials", app_object_id);
        let response = self
            .request(reqwest::Method::POST, &path)
            .await?
            .json(&NewFederatedCredential {
                name: &trust.name,
                issuer: &trust.issuer,
                subject: &trust.subject,
                audiences: &trust.audiences,
                description: trust.description.as_deref(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(write_error(&resource, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| DirectoryError::RemoteWrite {
                resource,
                status: None,
                message: format!("cannot decode response: {}", e),
            })
    }
}
