//! Identity-side reconciliation: application, service principal, roles and
//! federated credentials.
//!
//! Every step is check-then-create. Nothing is ever deleted or updated in place:
//! - Applications are matched by display name
//! - Federated credentials are matched by name (a changed subject is not corrected)
//! - Role assignments are attempted only when the application is new, and each
//!   role is isolated from the others

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    directory::{AuthorizationClient, DirectoryClient, DirectoryError},
    model::{
        Application, AzureContext, FederationTrust, Reconciled, RepositoryRef, RoleAssignment,
        RoleDefinition, RuntimeIdentity,
    },
};

/// Default wait between creating a service principal and assigning roles to it.
///
/// Directory replication lags behind; assigning roles too early fails with
/// "principal not found".
pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_secs(30);

/// Branch trusted when none is configured.
pub const DEFAULT_BRANCH: &str = "main";

/// Settings for an [`IdentityProvisioner`].
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Tenant and subscription the roles are granted in.
    pub context: AzureContext,

    /// Resource group the roles are scoped to.
    pub resource_group: String,

    /// Roles granted to a newly created service principal.
    pub roles: Vec<RoleDefinition>,

    /// Wait after creating the service principal, before role assignment.
    pub propagation_delay: Duration,
}

impl ProvisionerSettings {
    pub fn new(context: AzureContext, resource_group: impl Into<String>) -> Self {
        Self {
            context,
            resource_group: resource_group.into(),
            roles: vec![RoleDefinition::contributor()],
            propagation_delay: DEFAULT_PROPAGATION_DELAY,
        }
    }

    pub fn with_roles(mut self, roles: Vec<RoleDefinition>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    /// Scope string for the configured resource group.
    pub fn scope(&self) -> String {
        self.context.resource_group_scope(&self.resource_group)
    }
}

/// Result of granting one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GrantOutcome {
    /// The assignment was created.
    Granted { assignment_id: String },
    /// The provider already holds an equivalent assignment.
    AlreadyAssigned { reason: String },
    /// The assignment failed.
    Failed { reason: String },
}

/// Per-role entry of a [`IdentityProvisioner::grant_roles`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: RoleDefinition,
    pub outcome: GrantOutcome,
}

impl RoleGrant {
    pub fn is_granted(&self) -> bool {
        matches!(self.outcome, GrantOutcome::Granted { .. })
    }
}

/// Result of [`IdentityProvisioner::ensure_application`].
#[derive(Debug, Clone)]
pub struct EnsuredApplication {
    /// The application, tagged created or existing.
    pub application: Reconciled<Application>,

    /// Service principal created in this run, if the application was new.
    pub runtime_identity: Option<RuntimeIdentity>,

    /// Role grants attempted in this run (empty for an existing application).
    pub role_grants: Vec<RoleGrant>,
}

impl EnsuredApplication {
    /// Whether the application was created in this run.
    pub fn was_created(&self) -> bool {
        self.application.was_created()
    }

    pub fn client_id(&self) -> &str {
        &self.application.resource.client_id
    }

    pub fn object_id(&self) -> &str {
        &self.application.resource.object_id
    }
}

/// Ensures the identity-provider side of the federation exists.
pub struct IdentityProvisioner {
    directory: Arc<dyn DirectoryClient>,
    authorization: Arc<dyn AuthorizationClient>,
    settings: ProvisionerSettings,
}

impl IdentityProvisioner {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        authorization: Arc<dyn AuthorizationClient>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            directory,
            authorization,
            settings,
        }
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Find the application by display name, or create it with its service
    /// principal and role grants.
    ///
    /// Role failures do not fail this call; they are reported in
    /// [`EnsuredApplication::role_grants`].
    pub async fn ensure_application(
        &self,
        name: &str,
        description: &str,
    ) -> Result<EnsuredApplication, DirectoryError> {
        if let Some(existing) = self.directory.find_application(name).await? {
            tracing::info!(
                "Application '{}' already exists (client id {})",
                name,
                existing.client_id
            );
            return Ok(EnsuredApplication {
                application: Reconciled::existing(existing),
                runtime_identity: None,
                role_grants: Vec::new(),
            });
        }

        let app = self.directory.create_application(name, description).await?;
        tracing::info!(
            "Created application '{}' (client id {}, object id {})",
            app.display_name,
            app.client_id,
            app.object_id
        );

        let sp = self.directory.create_service_principal(&app.client_id).await?;
        tracing::info!("Created service principal {}", sp.id);

        if !self.settings.propagation_delay.is_zero() {
            tracing::info!(
                "Waiting {:?} for service principal to propagate",
                self.settings.propagation_delay
            );
            tokio::time::sleep(self.settings.propagation_delay).await;
        }

        let role_grants = self
            .grant_roles(&sp.id, &self.settings.scope(), &self.settings.roles)
            .await;

        Ok(EnsuredApplication {
            application: Reconciled::created(app),
            runtime_identity: Some(sp),
            role_grants,
        })
    }

    /// Assign each role to `principal_id` at `scope`.
    ///
    /// Never fails: every role is attempted, with a fresh assignment name, and
    /// its outcome recorded.
    pub async fn grant_roles(
        &self,
        principal_id: &str,
        scope: &str,
        roles: &[RoleDefinition],
    ) -> Vec<RoleGrant> {
        tracing::info!("Assigning {} role(s) at scope {}", roles.len(), scope);

        let mut grants = Vec::with_capacity(roles.len());
        for role in roles {
            let assignment = RoleAssignment {
                assignment_id: Uuid::new_v4().to_string(),
                scope: scope.to_string(),
                role_definition_id: self.settings.context.role_definition_id(&role.id),
                principal_id: principal_id.to_string(),
            };

            let outcome = match self.authorization.create_role_assignment(&assignment).await {
                Ok(created) => {
                    tracing::info!("Assigned role: {}", role.name);
                    GrantOutcome::Granted {
                        assignment_id: created.assignment_id,
                    }
                }
                Err(DirectoryError::Conflict { message, .. }) => {
                    tracing::warn!("Role {} not assigned (conflict): {}", role.name, message);
                    GrantOutcome::AlreadyAssigned { reason: message }
                }
                Err(e) => {
                    tracing::error!("Failed to assign role {}: {}", role.name, e);
                    GrantOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            grants.push(RoleGrant {
                role: role.clone(),
                outcome,
            });
        }
        grants
    }

    /// Ensure a federated credential trusting `repo` exists on the application.
    ///
    /// # Arguments
    ///
    /// * `app_object_id` - Object id of an ensured application; `None` or empty
    ///   is a precondition failure
    /// * `repo` - Repository whose workflows are trusted
    /// * `credential_name` - Defaults to `{owner}-{repo}-federated`
    /// * `branches` - Defaults to `["main"]`; only the first entry is used
    ///
    /// An existing credential with the same name is left as is, even if its
    /// subject differs.
    pub async fn ensure_federation_trust(
        &self,
        app_object_id: Option<&str>,
        repo: &RepositoryRef,
        credential_name: Option<&str>,
        branches: Option<&[String]>,
    ) -> Result<Reconciled<FederationTrust>, DirectoryError> {
        let object_id = app_object_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DirectoryError::Precondition {
                message: "application object id is not set; ensure the application first"
                    .to_string(),
            })?;

        let name = credential_name
            .map(str::to_string)
            .unwrap_or_else(|| FederationTrust::default_name(repo));

        let branch = match branches {
            Some([first, rest @ ..]) => {
                if !rest.is_empty() {
                    tracing::warn!(
                        "Only branch '{}' is trusted for {}; ignoring {:?}",
                        first,
                        repo,
                        rest
                    );
                }
                first.as_str()
            }
            _ => DEFAULT_BRANCH,
        };

        let desired = FederationTrust::for_branch(name, repo, branch);

        tracing::debug!("Checking if federated credential '{}' exists", desired.name);
        let existing = self.directory.list_federation_trusts(object_id).await?;
        if let Some(found) = existing.into_iter().find(|t| t.name == desired.name) {
            if found.subject != desired.subject {
                tracing::debug!(
                    "Federated credential '{}' has subject '{}', wanted '{}'; leaving unchanged",
                    found.name,
                    found.subject,
                    desired.subject
                );
            }
            tracing::info!("Federated credential '{}' already exists", found.name);
            return Ok(Reconciled::existing(found));
        }

        let created = self
            .directory
            .create_federation_trust(object_id, &desired)
            .await?;
        tracing::info!(
            "Created federated credential '{}' with subject {}",
            created.name,
            created.subject
        );
        Ok(Reconciled::created(created))
    }
}

impl std::fmt::Debug for IdentityProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvisioner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
