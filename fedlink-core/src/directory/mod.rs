//! Identity-provider and authorization backends.
//!
//! This module provides:
//! - [`DirectoryClient`] - Trait over the directory API (applications, service
//!   principals, federated credentials)
//! - [`AuthorizationClient`] - Trait over the role-assignment API
//! - [`GraphClient`] - Microsoft Graph implementation of [`DirectoryClient`]
//! - [`ArmClient`] - Azure Resource Manager implementation of [`AuthorizationClient`],
//!   plus subscription and resource group lookups
//! - [`MemoryDirectory`] - In-memory implementation of both traits for testing
//! - [`AzureCredential`] - Source of Azure bearer tokens per scope

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Application, FederationTrust, RoleAssignment, RuntimeIdentity};

mod arm;
mod credential;
mod graph;
mod memory;

pub use arm::{ARM_SCOPE, ARM_URL, ArmClient};
pub use credential::{AzureCliCredential, AzureCredential, StaticCredential};
pub use graph::{GRAPH_SCOPE, GRAPH_URL, GraphClient};
pub use memory::MemoryDirectory;

/// Error type for directory and authorization operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A resource this operation depends on has not been established.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// A query against the provider failed.
    #[error("lookup of {resource} failed: {message}")]
    ResourceLookup { resource: String, message: String },

    /// A create call was rejected.
    #[error("write of {resource} failed (status {status:?}): {message}")]
    RemoteWrite {
        resource: String,
        status: Option<u16>,
        message: String,
    },

    /// The provider reported that an equivalent resource already exists.
    #[error("{resource} already exists: {message}")]
    Conflict { resource: String, message: String },

    /// No usable Azure credential.
    #[error("azure credential error: {message}")]
    Credential { message: String },

    /// Network error while talking to the provider.
    #[error("network error: {message}")]
    Network { message: String },
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        DirectoryError::Network {
            message: e.to_string(),
        }
    }
}

/// Directory operations fedlink relies on.
///
/// Implementations include:
/// - [`GraphClient`] - Microsoft Graph v1.0
/// - [`MemoryDirectory`] - In-memory directory for testing
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Find an application by exact display name. First match wins.
    async fn find_application(
        &self,
        display_name: &str,
    ) -> Result<Option<Application>, DirectoryError>;

    /// Register a new application.
    async fn create_application(
        &self,
        display_name: &str,
        description: &str,
    ) -> Result<Application, DirectoryError>;

    /// Create the service principal for an application's client id.
    async fn create_service_principal(
        &self,
        app_client_id: &str,
    ) -> Result<RuntimeIdentity, DirectoryError>;

    /// List the federated credentials of an application.
    async fn list_federation_trusts(
        &self,
        app_object_id: &str,
    ) -> Result<Vec<FederationTrust>, DirectoryError>;

    /// Add a federated credential to an application.
    async fn create_federation_trust(
        &self,
        app_object_id: &str,
        trust: &FederationTrust,
    ) -> Result<FederationTrust, DirectoryError>;
}

/// Role assignment operations.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Create a role assignment named `assignment.assignment_id`.
    ///
    /// Returns [`DirectoryError::Conflict`] when the provider already holds an
    /// identical scope/role/principal assignment.
    async fn create_role_assignment(
        &self,
        assignment: &RoleAssignment,
    ) -> Result<RoleAssignment, DirectoryError>;
}

/// Turn a non-success lookup response into a [`DirectoryError`].
pub(crate) async fn lookup_error(resource: &str, response: reqwest::Response) -> DirectoryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    DirectoryError::ResourceLookup {
        resource: resource.to_string(),
        message: format!("status {}: {}", status.as_u16(), body),
    }
}

/// Turn a non-success create response into a [`DirectoryError`].
pub(crate) async fn write_error(resource: &str, response: reqwest::Response) -> DirectoryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::CONFLICT {
        return DirectoryError::Conflict {
            resource: resource.to_string(),
            message: body,
        };
    }
    DirectoryError::RemoteWrite {
        resource: resource.to_string(),
        status: Some(status.as_u16()),
        message: body,
    }
}
