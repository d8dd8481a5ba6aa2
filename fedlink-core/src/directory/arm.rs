//! Azure Resource Manager backend: role assignments, subscriptions and resource groups.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use super::{AuthorizationClient, AzureCredential, DirectoryError, lookup_error, write_error};
use crate::http::{self, DEFAULT_TIMEOUT};
use crate::model::{AzureContext, RoleAssignment};

/// Azure Resource Manager root.
pub const ARM_URL: &str = "https://management.azure.com";

/// Token scope for Azure Resource Manager.
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

const ROLE_ASSIGNMENTS_API_VERSION: &str = "2022-04-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";
const RESOURCE_GROUPS_API_VERSION: &str = "2021-04-01";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignmentProperties<'a> {
    role_definition_id: &'a str,
    principal_id: &'a str,
    principal_type: &'a str,
}

#[derive(Debug, Serialize)]
struct RoleAssignmentBody<'a> {
    properties: RoleAssignmentProperties<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subscription {
    subscription_id: String,
    tenant_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    value: Vec<Subscription>,
}

/// Azure Resource Manager client.
pub struct ArmClient {
    http_client: reqwest::Client,
    base_url: Url,
    credential: Arc<dyn AzureCredential>,
}

impl ArmClient {
    /// Create a client against the public ARM endpoint.
    pub fn new(credential: Arc<dyn AzureCredential>) -> Self {
        let base_url = Url::parse(ARM_URL).expect("static ARM URL is valid");
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
        api_version: &str,
    ) -> Result<reqwest::RequestBuilder, DirectoryError> {
        let token = self.credential.access_token(ARM_SCOPE).await?;
        Ok(self
            .http_client
            .request(method, http::endpoint(&self.base_url, path))
            .query(&[("api-version", api_version)])
            .bearer_auth(token.value.expose()))
    }

    /// Resolve the tenant and subscription to operate in.
    ///
    /// The first subscription visible to the credential wins.
    pub async fn default_context(&self) -> Result<AzureContext, DirectoryError> {
        let response = self
            .request(reqwest::Method::GET, "subscriptions", SUBSCRIPTIONS_API_VERSION)
            .await?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(lookup_error("subscriptions", response).await);
        }

        let list: SubscriptionList = response
            .json()
            .await
            .map_err(|e| DirectoryError::ResourceLookup {
                resource: "subscriptions".to_string(),
                message: format!("cannot decode response: {}", e),
            })?;

        let first = list
            .value
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::ResourceLookup {
                resource: "subscriptions".to_string(),
                message: "no subscriptions found".to_string(),
            })?;

        tracing::info!(
            "Using subscription {} ({}) in tenant {}",
            first.subscription_id,
            first.display_name.as_deref().unwrap_or("unnamed"),
            first.tenant_id
        );

        Ok(AzureContext {
            tenant_id: first.tenant_id,
            subscription_id: first.subscription_id,
            subscription_name: first.display_name,
        })
    }

    /// Check whether a resource group exists in the context's subscription.
    pub async fn resource_group_exists(
        &self,
        context: &AzureContext,
        resource_group: &str,
    ) -> Result<bool, DirectoryError> {
        let path = format!(
            "subscriptions/{}/resourcegroups/{}",
            context.subscription_id, resource_group
        );
        let response = self
            .request(reqwest::Method::GET, &path, RESOURCE_GROUPS_API_VERSION)
            .await?
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            _ => Err(lookup_error(&format!("resource group {}", resource_group), response).await),
        }
    }
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthorizationClient for ArmClient {
    async fn create_role_assignment(
        &self,
        assignment: &RoleAssignment,
    ) -> Result<RoleAssignment, DirectoryError> {
        let resource = format!("role assignment {}", assignment.role_definition_id);
        let path = format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            assignment.scope, assignment.assignment_id
        );

        let response = self
            .request(reqwest::Method::PUT, &path, ROLE_ASSIGNMENTS_API_VERSION)
            .await?
            .json(&RoleAssignmentBody {
                properties: RoleAssignmentProperties {
                    role_definition_id: &assignment.role_definition_id,
                    principal_id: &assignment.principal_id,
                    principal_type: "ServicePrincipal",
                },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(write_error(&resource, response).await);
        }

        Ok(assignment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_assignment_body_shape() {
        let body = RoleAssignmentBody {
            properties: RoleAssignmentProperties {
                role_definition_id: "/subscriptions/s/providers/Microsoft.Authorization/roleDefinitions/r",
                principal_id: "p",
                principal_type: "ServicePrincipal",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["properties"]["principalType"], "ServicePrincipal");
        assert_eq!(json["properties"]["principalId"], "p");
        assert!(json["properties"]["roleDefinitionId"]
            .as_str()
            .unwrap()
            .ends_with("/roleDefinitions/r"));
    }
}
