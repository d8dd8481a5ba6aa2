//! # fedlink Core
//!
//! Core library for provisioning workload identity federation between GitHub
//! Actions and Azure.
//!
//! This crate provides:
//! - An identity provisioner that ensures an Entra ID application, its service
//!   principal, role assignments and per-repository federated credentials
//! - A GitHub App installation token manager with a cached, single-flight refresh
//! - A repository secret publisher that seals values for each repository's key
//! - An orchestrator that runs the whole sequence and reports per-item outcomes
//!
//! Directory and authorization backends sit behind traits. The Graph and ARM
//! REST clients talk to Azure; [`MemoryDirectory`] stands in for tests.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fedlink_core::*;
//!
//! async fn provision(plan: &RunPlan) -> Result<RunReport, FedlinkError> {
//!     let credential: Arc<dyn AzureCredential> = Arc::new(AzureCliCredential::new());
//!     let arm = Arc::new(ArmClient::new(credential.clone()));
//!     let context = arm.default_context().await?;
//!
//!     let provisioner = IdentityProvisioner::new(
//!         Arc::new(GraphClient::new(credential)),
//!         arm,
//!         ProvisionerSettings::new(context, "deploy-rg"),
//!     );
//!
//!     let app = GitHubAppConfig::new("12345", "67890", "/etc/fedlink/app.pem");
//!     let tokens = Arc::new(InstallationTokenManager::new(app));
//!     let publisher = RepositorySecretPublisher::new(tokens);
//!
//!     Orchestrator::new(provisioner, publisher).run(plan).await
//! }
//! ```

pub mod clock;
pub mod directory;
pub mod error;
pub mod github;
pub mod http;
pub mod model;
pub mod provisioner;
pub mod reconcile;
pub mod seal;
pub mod secret;
pub mod token;
pub mod token_manager;

// Re-export commonly used types at crate root
pub use model::{
    Application,
    AzureContext,
    ConnectionBundle,
    FederationTrust,
    Outcome,
    Reconciled,
    RepositoryRef,
    RoleAssignment,
    RoleDefinition,
    RuntimeIdentity,
};

pub use clock::{Clock, ManualClock, SystemClock};

pub use secret::Secret;

pub use token::{
    StaticToken,
    Token,
    TokenError,
    TokenSource,
};

pub use token_manager::{GitHubAppConfig, InstallationTokenManager};

pub use seal::{SealError, SecretSealer};

pub use directory::{
    ArmClient,
    AuthorizationClient,
    AzureCliCredential,
    AzureCredential,
    DirectoryClient,
    DirectoryError,
    GraphClient,
    MemoryDirectory,
    StaticCredential,
};

pub use provisioner::{
    EnsuredApplication,
    GrantOutcome,
    IdentityProvisioner,
    ProvisionerSettings,
    RoleGrant,
};

pub use github::{
    PublishOutcome,
    RemoteSecretKey,
    RepoError,
    RepositorySecretPublisher,
    RepositoryStatus,
};

pub use reconcile::{
    Orchestrator,
    RepositoryReport,
    RunPlan,
    RunReport,
    SecretAction,
    SecretReport,
    TrustOutcome,
    should_write,
};

pub use error::FedlinkError;
