//! End-to-end run: reachability check, application, then per-repository
//! federation trust and secret sync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    error::FedlinkError,
    github::{PublishOutcome, RepositorySecretPublisher, RepositoryStatus},
    model::{
        Application, AzureContext, ConnectionBundle, FederationTrust, Outcome, Reconciled,
        RepositoryRef,
    },
    provisioner::{GrantOutcome, IdentityProvisioner, RoleGrant},
};

/// What a run should reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    pub repositories: Vec<RepositoryRef>,
    pub application_name: String,
    pub application_description: String,

    /// Federated credential name; defaults to `{owner}-{repo}-federated` per repository.
    pub credential_name: Option<String>,

    /// Trusted branches; only the first is used.
    pub branches: Vec<String>,

    pub cluster_name: Option<String>,
    pub container_registry: Option<String>,
}

/// What happened to one secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SecretAction {
    Created,
    Updated,
    /// Present already and the application is not new.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReport {
    pub name: String,
    pub action: SecretAction,
}

/// What happened to a repository's federated credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrustOutcome {
    Ensured {
        outcome: Outcome,
        name: String,
        subject: String,
    },
    Failed {
        reason: String,
    },
}

impl From<Reconciled<FederationTrust>> for TrustOutcome {
    fn from(trust: Reconciled<FederationTrust>) -> Self {
        TrustOutcome::Ensured {
            outcome: trust.outcome,
            name: trust.resource.name,
            subject: trust.resource.subject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReport {
    pub repository: RepositoryRef,
    pub trust: TrustOutcome,
    pub secrets: Vec<SecretReport>,
}

impl RepositoryReport {
    /// Secrets reported with the given action kind.
    pub fn secrets_where(&self, predicate: impl Fn(&SecretAction) -> bool) -> Vec<&str> {
        self.secrets
            .iter()
            .filter(|s| predicate(&s.action))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Aggregated result of [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub context: AzureContext,
    pub application: Reconciled<Application>,
    pub role_grants: Vec<RoleGrant>,
    pub repositories: Vec<RepositoryReport>,
}

impl RunReport {
    /// Number of isolated failures (roles, trusts and secrets).
    pub fn failure_count(&self) -> usize {
        let roles = self
            .role_grants
            .iter()
            .filter(|g| matches!(g.outcome, GrantOutcome::Failed { .. }));
        let trusts = self
            .repositories
            .iter()
            .filter(|r| matches!(r.trust, TrustOutcome::Failed { .. }));
        let secrets = self
            .repositories
            .iter()
            .flat_map(|r| r.secrets.iter())
            .filter(|s| matches!(s.action, SecretAction::Failed { .. }));

        roles.count() + trusts.count() + secrets.count()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Decide whether a bundle field must be written.
///
/// Write unless the upper-cased name already exists and the application
/// predates this run.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use fedlink_core::should_write;
///
/// let existing: BTreeSet<String> = ["CLIENT_ID".to_string()].into();
/// assert!(!should_write("client_id", &existing, false));
/// assert!(should_write("client_id", &existing, true));
/// assert!(should_write("tenant_id", &existing, false));
/// ```
pub fn should_write(field: &str, existing: &BTreeSet<String>, app_created: bool) -> bool {
    app_created || !existing.contains(&field.to_uppercase())
}

/// Drives a full run across the planned repositories.
pub struct Orchestrator {
    provisioner: IdentityProvisioner,
    publisher: RepositorySecretPublisher,
}

impl Orchestrator {
    pub fn new(provisioner: IdentityProvisioner, publisher: RepositorySecretPublisher) -> Self {
        Self {
            provisioner,
            publisher,
        }
    }

    /// Check every repository, in order.
    pub async fn check_repositories(
        &self,
        repositories: &[RepositoryRef],
    ) -> Vec<(RepositoryRef, RepositoryStatus)> {
        let mut statuses = Vec::with_capacity(repositories.len());
        for repo in repositories {
            tracing::info!("Checking repository {}", repo);
            let status = self.publisher.check_repository(repo).await;
            tracing::debug!("{}: {}", repo, status.message);
            statuses.push((repo.clone(), status));
        }
        statuses
    }

    /// Reconcile the application and every repository in `plan`.
    ///
    /// Fails without touching the directory when any repository is unreachable.
    /// After that only the application lookup/creation can fail the run; every
    /// per-repository step is recorded in the report instead.
    pub async fn run(&self, plan: &RunPlan) -> Result<RunReport, FedlinkError> {
        let statuses = self.check_repositories(&plan.repositories).await;
        let unreachable: Vec<String> = statuses
            .iter()
            .filter(|(_, status)| !status.is_reachable())
            .map(|(repo, status)| format!("{} ({})", repo, status.message))
            .collect();
        if !unreachable.is_empty() {
            return Err(FedlinkError::Precondition {
                message: format!(
                    "repositories not reachable, nothing provisioned: {}",
                    unreachable.join(", ")
                ),
            });
        }

        let ensured = self
            .provisioner
            .ensure_application(&plan.application_name, &plan.application_description)
            .await?;
        let app_created = ensured.was_created();

        let settings = self.provisioner.settings();
        let bundle = ConnectionBundle {
            subscription_id: settings.context.subscription_id.clone(),
            tenant_id: settings.context.tenant_id.clone(),
            client_id: ensured.client_id().to_string(),
            resource_group: settings.resource_group.clone(),
            cluster_name: plan.cluster_name.clone(),
            container_registry: plan.container_registry.clone(),
        };

        let mut reports = Vec::with_capacity(plan.repositories.len());
        for repo in &plan.repositories {
            let trust = match self
                .provisioner
                .ensure_federation_trust(
                    Some(ensured.object_id()),
                    repo,
                    plan.credential_name.as_deref(),
                    Some(plan.branches.as_slice()),
                )
                .await
            {
                Ok(trust) => TrustOutcome::from(trust),
                Err(e) => {
                    tracing::error!("Federated credential for {} failed: {}", repo, e);
                    TrustOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            let secrets = self.sync_secrets(repo, &bundle, app_created).await;
            reports.push(RepositoryReport {
                repository: repo.clone(),
                trust,
                secrets,
            });
        }

        Ok(RunReport {
            context: settings.context.clone(),
            application: ensured.application,
            role_grants: ensured.role_grants,
            repositories: reports,
        })
    }

    async fn sync_secrets(
        &self,
        repo: &RepositoryRef,
        bundle: &ConnectionBundle,
        app_created: bool,
    ) -> Vec<SecretReport> {
        let existing = self.publisher.list_secret_names(repo).await;

        let mut reports = Vec::new();
        for (field, value) in bundle.entries() {
            let name = field.to_uppercase();
            let action = if !should_write(field, &existing, app_created) {
                tracing::info!("Secret '{}' already exists in {}, skipping", name, repo);
                SecretAction::Skipped
            } else {
                match self.publisher.publish(repo, &name, value).await {
                    PublishOutcome::Created => SecretAction::Created,
                    PublishOutcome::Updated => SecretAction::Updated,
                    PublishOutcome::Failed { reason } => SecretAction::Failed { reason },
                }
            };
            reports.push(SecretReport { name, action });
        }
        reports
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provisioner", &self.provisioner)
            .field("publisher", &self.publisher)
            .finish()
    }
}
