//! Domain model types for fedlink.
//!
//! This module defines the resources fedlink reconciles:
//! - [`RepositoryRef`] - A GitHub repository (`owner/name`)
//! - [`Application`] - An Entra ID application registration
//! - [`RuntimeIdentity`] - The service principal paired with an application
//! - [`RoleAssignment`] - An Azure RBAC assignment for the service principal
//! - [`FederationTrust`] - A federated identity credential on the application
//! - [`ConnectionBundle`] - The values published as repository secrets
//! - [`Reconciled`] - A resource tagged with how it was reconciled

use serde::{Deserialize, Serialize};
use std::fmt;

/// Issuer of GitHub Actions OIDC tokens.
pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Audience Entra ID expects on federated tokens.
pub const AZURE_TOKEN_EXCHANGE_AUDIENCE: &str = "api://AzureADTokenExchange";

/// A GitHub repository, owned by a user or an organization.
///
/// # Examples
///
/// ```
/// use fedlink_core::RepositoryRef;
///
/// let repo = RepositoryRef::new("raibid-labs", "deploy");
/// assert_eq!(repo.to_string(), "raibid-labs/deploy");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// User or organization login.
    pub owner: String,

    /// Repository name.
    pub name: String,
}

impl RepositoryRef {
    /// Create a new repository reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// An application registration in the identity provider.
///
/// Unique by display name within the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Directory object id (used to address the application).
    #[serde(rename = "id")]
    pub object_id: String,

    /// Application (client) id.
    #[serde(rename = "appId")]
    pub client_id: String,

    #[serde(rename = "displayName")]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The service principal that authenticates as an [`Application`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    /// Directory object id of the service principal.
    pub id: String,

    /// Client id of the owning application.
    #[serde(rename = "appId")]
    pub app_id: String,
}

/// A role assignment granted to a service principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Random assignment name; fresh on every create call.
    pub assignment_id: String,

    /// Scope the role applies to, e.g. `/subscriptions/{sub}/resourceGroups/{rg}`.
    pub scope: String,

    /// Fully qualified role definition id.
    pub role_definition_id: String,

    /// Object id of the service principal.
    pub principal_id: String,
}

/// A built-in Azure role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Role definition GUID.
    pub id: String,

    /// Human-readable role name, used in logs and reports.
    pub name: String,
}

impl RoleDefinition {
    /// Create a new role definition.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The `Contributor` built-in role.
    pub fn contributor() -> Self {
        Self::new("b24988ac-6180-42a0-ab88-20f7382dd24c", "Contributor")
    }

    /// The `Azure Kubernetes Service RBAC Cluster Admin` built-in role.
    pub fn aks_rbac_cluster_admin() -> Self {
        Self::new(
            "b1ff04bb-8a4e-4dc4-8eb5-8693973ce19b",
            "Azure Kubernetes Service RBAC Cluster Admin",
        )
    }
}

/// A federated identity credential on an application.
///
/// Keyed by `name`; the subject pins exactly one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationTrust {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    pub issuer: String,

    pub subject: String,

    pub audiences: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FederationTrust {
    /// Build the trust record for a GitHub repository branch.
    pub fn for_branch(name: impl Into<String>, repo: &RepositoryRef, branch: &str) -> Self {
        Self {
            id: None,
            name: name.into(),
            issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            subject: format!("repo:{}/{}:ref:refs/heads/{}", repo.owner, repo.name, branch),
            audiences: vec![AZURE_TOKEN_EXCHANGE_AUDIENCE.to_string()],
            description: Some(format!("Federated credential for GitHub repo {}", repo.name)),
        }
    }

    /// Default credential name for a repository: `{owner}-{repo}-federated`.
    pub fn default_name(repo: &RepositoryRef) -> String {
        format!("{}-{}-federated", repo.owner, repo.name)
    }
}

/// Tenant and subscription the run operates in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureContext {
    pub tenant_id: String,
    pub subscription_id: String,

    /// Display name of the subscription, when known.
    #[serde(default)]
    pub subscription_name: Option<String>,
}

impl AzureContext {
    /// Resource group scope string used for role assignments.
    pub fn resource_group_scope(&self, resource_group: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, resource_group
        )
    }

    /// Fully qualified role definition id within this subscription.
    pub fn role_definition_id(&self, role_id: &str) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            self.subscription_id, role_id
        )
    }
}

/// Connection parameters published into each repository.
///
/// Each present field becomes one repository secret named after the field
/// in upper case (e.g. `client_id` becomes `CLIENT_ID`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionBundle {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub resource_group: String,
    pub cluster_name: Option<String>,
    pub container_registry: Option<String>,
}

impl ConnectionBundle {
    /// Field name/value pairs in publication order. Absent optional fields are omitted.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        let mut entries = vec![
            ("subscription_id", self.subscription_id.as_str()),
            ("tenant_id", self.tenant_id.as_str()),
            ("client_id", self.client_id.as_str()),
            ("resource_group", self.resource_group.as_str()),
        ];
        if let Some(cluster) = &self.cluster_name {
            entries.push(("cluster_name", cluster.as_str()));
        }
        if let Some(registry) = &self.container_registry {
            entries.push(("container_registry", registry.as_str()));
        }
        entries
    }
}

/// How a check-then-create step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The resource did not exist and was created in this run.
    Created,
    /// A matching resource already existed and was left untouched.
    Existing,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Existing => write!(f, "existing"),
        }
    }
}

/// A resource tagged with the [`Outcome`] of reconciling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciled<T> {
    pub outcome: Outcome,
    pub resource: T,
}

impl<T> Reconciled<T> {
    pub fn created(resource: T) -> Self {
        Self {
            outcome: Outcome::Created,
            resource,
        }
    }

    pub fn existing(resource: T) -> Self {
        Self {
            outcome: Outcome::Existing,
            resource,
        }
    }

    pub fn was_created(&self) -> bool {
        self.outcome == Outcome::Created
    }
}
