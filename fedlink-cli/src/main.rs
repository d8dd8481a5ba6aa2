//! fedlink CLI
//!
//! Provisions workload identity federation between GitHub Actions and Azure:
//! an Entra ID application with role assignments, a federated credential per
//! repository, and the connection parameters as repository secrets.
//!
//! # Usage
//!
//! ```bash
//! # Check that every configured repository is reachable
//! fedlink check-repos
//!
//! # Run the full provisioning sequence
//! fedlink provision
//!
//! # List the Actions secrets of one repository
//! fedlink list-secrets infra
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fedlink_core::{
    ArmClient, AzureCliCredential, AzureCredential, GrantOutcome, GraphClient,
    IdentityProvisioner, InstallationTokenManager, Orchestrator, ProvisionerSettings,
    RepositorySecretPublisher, RunReport, SecretAction, TrustOutcome,
    http::build_client,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod config;

use config::FedlinkConfig;

#[derive(Parser)]
#[command(name = "fedlink")]
#[command(about = "Link GitHub Actions to Azure with workload identity federation")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the application, federated credentials and repository secrets
    Provision {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that every configured repository exists and is accessible
    CheckRepos,

    /// List the Actions secret names of a repository
    ListSecrets {
        /// Repository name, or owner/name
        repository: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);
    info!("Loaded configuration from {:?}", config.config_path);

    match cli.command {
        Commands::Provision { json } => provision(&config, json).await,
        Commands::CheckRepos => check_repos(&config).await,
        Commands::ListSecrets { repository } => list_secrets(&config, &repository).await,
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

fn publisher(config: &FedlinkConfig) -> Result<RepositorySecretPublisher> {
    let http_client = build_client(config.timeout());
    let tokens = InstallationTokenManager::new(config.github_app()?)
        .with_http_client(http_client.clone());

    Ok(
        RepositorySecretPublisher::with_api_url(Arc::new(tokens), config.github.api_url.clone())
            .with_http_client(http_client),
    )
}

fn azure_credential(config: &FedlinkConfig) -> Arc<dyn AzureCredential> {
    match config.static_azure_credential(|key| std::env::var(key).ok()) {
        Some(credential) => {
            info!("Using pre-issued Azure access tokens from the environment");
            Arc::new(credential)
        }
        None => Arc::new(AzureCliCredential::new()),
    }
}

async fn provision(config: &FedlinkConfig, json: bool) -> Result<()> {
    let plan = config.run_plan()?;
    let publisher = publisher(config)?;

    let http_client = build_client(config.timeout());
    let credential = azure_credential(config);
    let arm = Arc::new(
        ArmClient::with_base_url(credential.clone(), config.azure.management_url.clone())
            .with_http_client(http_client.clone()),
    );
    let graph = Arc::new(
        GraphClient::with_base_url(credential, config.azure.graph_url.clone())
            .with_http_client(http_client),
    );

    let context = arm
        .default_context()
        .await
        .context("Failed to resolve Azure subscription")?;

    let resource_group = &config.azure.resource_group;
    if !arm.resource_group_exists(&context, resource_group).await? {
        bail!(
            "Resource group '{}' not found in subscription {}",
            resource_group,
            context.subscription_id
        );
    }

    let settings = ProvisionerSettings::new(context, resource_group.clone())
        .with_roles(config.roles())
        .with_propagation_delay(config.propagation_delay());
    let provisioner = IdentityProvisioner::new(graph, arm, settings);

    let report = Orchestrator::new(provisioner, publisher)
        .run(&plan)
        .await
        .context("Provisioning aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_clean() {
        bail!("{} item(s) failed, see the report above", report.failure_count());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let app = &report.application.resource;
    println!(
        "Application '{}' ({}): {}",
        app.display_name, app.client_id, report.application.outcome
    );
    println!(
        "  Subscription: {} (tenant {})",
        report.context.subscription_id, report.context.tenant_id
    );

    if !report.role_grants.is_empty() {
        println!("  Roles:");
        for grant in &report.role_grants {
            let status = match &grant.outcome {
                GrantOutcome::Granted { .. } => "granted".to_string(),
                GrantOutcome::AlreadyAssigned { reason } => {
                    format!("already assigned ({})", reason)
                }
                GrantOutcome::Failed { reason } => format!("FAILED ({})", reason),
            };
            println!("    {}: {}", grant.role.name, status);
        }
    }

    for repo in &report.repositories {
        println!();
        println!("{}", repo.repository);
        match &repo.trust {
            TrustOutcome::Ensured { outcome, name, subject } => {
                println!("  Federated credential {} ({}): {}", name, subject, outcome)
            }
            TrustOutcome::Failed { reason } => {
                println!("  Federated credential: FAILED ({})", reason)
            }
        }
        for secret in &repo.secrets {
            let status = match &secret.action {
                SecretAction::Created => "created".to_string(),
                SecretAction::Updated => "updated".to_string(),
                SecretAction::Skipped => "skipped (already present)".to_string(),
                SecretAction::Failed { reason } => format!("FAILED ({})", reason),
            };
            println!("  {}: {}", secret.name, status);
        }
    }
}

async fn check_repos(config: &FedlinkConfig) -> Result<()> {
    let publisher = publisher(config)?;

    let mut unreachable = 0;
    for repo in config.repository_refs()? {
        let status = publisher.check_repository(&repo).await;
        let marker = if status.is_reachable() { "ok" } else { "UNREACHABLE" };
        println!("{:<12} {}", marker, status.message);
        if !status.is_reachable() {
            unreachable += 1;
        }
    }

    if unreachable > 0 {
        bail!("{} repository(ies) not reachable", unreachable);
    }
    Ok(())
}

async fn list_secrets(config: &FedlinkConfig, repository: &str) -> Result<()> {
    let repo = config::parse_repository(repository, &config.owner)?;
    let publisher = publisher(config)?;

    let names = publisher
        .list_repository_secrets(&repo)
        .await
        .with_context(|| format!("Failed to list secrets of {}", repo))?;

    if names.is_empty() {
        println!("No secrets in {}", repo);
    } else {
        println!("Secrets in {}:", repo);
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(())
}
