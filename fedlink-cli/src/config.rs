//! CLI configuration handling.

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use fedlink_core::{
    GitHubAppConfig, RepositoryRef, RoleDefinition, RunPlan, StaticCredential,
    directory::{ARM_SCOPE, ARM_URL, GRAPH_SCOPE, GRAPH_URL},
    provisioner::DEFAULT_BRANCH,
    token_manager::default_api_url,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variables that override `[github]` settings.
pub const ENV_APP_ID: &str = "GITHUB_APP_ID";
pub const ENV_INSTALLATION_ID: &str = "GITHUB_APP_INSTALL_ID";
pub const ENV_PRIVATE_KEY_PATH: &str = "GITHUB_APP_PRIVATE_KEY_PATH";

const CONFIG_FILE_NAME: &str = "fedlink.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FedlinkConfig {
    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// User or organization owning the repositories.
    pub owner: String,

    /// Repository names, or `owner/name` to override the owner.
    pub repositories: Vec<String>,

    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP timeout for GitHub, Graph and Resource Manager calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    pub application: ApplicationSection,

    pub azure: AzureSection,

    #[serde(default)]
    pub federation: FederationSection,

    #[serde(default)]
    pub github: GitHubSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSection {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureSection {
    pub resource_group: String,

    #[serde(default)]
    pub cluster_name: Option<String>,

    #[serde(default)]
    pub container_registry: Option<String>,

    /// Roles granted to a new service principal; see [`FedlinkConfig::roles`].
    #[serde(default)]
    pub roles: Option<Vec<RoleDefinition>>,

    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,

    #[serde(default = "default_graph_url")]
    pub graph_url: Url,

    #[serde(default = "default_management_url")]
    pub management_url: Url,

    /// Environment variable holding a pre-issued Microsoft Graph token.
    #[serde(default)]
    pub graph_token_env: Option<String>,

    /// Environment variable holding a pre-issued Resource Manager token.
    #[serde(default)]
    pub management_token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationSection {
    #[serde(default)]
    pub credential_name: Option<String>,

    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
}

impl Default for FederationSection {
    fn default() -> Self {
        Self {
            credential_name: None,
            branches: default_branches(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub app_id: Option<String>,

    #[serde(default)]
    pub installation_id: Option<String>,

    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default = "default_api_url")]
    pub api_url: Url,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            app_id: None,
            installation_id: None,
            private_key_path: None,
            api_url: default_api_url(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_propagation_delay_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_branches() -> Vec<String> {
    vec![DEFAULT_BRANCH.to_string()]
}

fn default_graph_url() -> Url {
    Url::parse(GRAPH_URL).expect("static Graph URL is valid")
}

fn default_management_url() -> Url {
    Url::parse(ARM_URL).expect("static ARM URL is valid")
}

impl FedlinkConfig {
    /// Parse and validate configuration text.
    pub fn parse(contents: &str, config_path: &Path) -> Result<Self> {
        let mut config: FedlinkConfig = toml::from_str(contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?;
        config.config_path = config_path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            bail!("`owner` must not be empty");
        }
        if self.repositories.is_empty() {
            bail!("`repositories` must list at least one repository");
        }
        if self.application.name.trim().is_empty() {
            bail!("`application.name` must not be empty");
        }
        if self.azure.resource_group.trim().is_empty() {
            bail!("`azure.resource_group` must not be empty");
        }
        if self.azure.graph_token_env.is_some() != self.azure.management_token_env.is_some() {
            bail!(
                "`azure.graph_token_env` and `azure.management_token_env` must be set together"
            );
        }
        Ok(())
    }

    /// Apply `GITHUB_APP_*` overrides from `lookup` (usually the process environment).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(app_id) = lookup(ENV_APP_ID) {
            self.github.app_id = Some(app_id);
        }
        if let Some(installation_id) = lookup(ENV_INSTALLATION_ID) {
            self.github.installation_id = Some(installation_id);
        }
        if let Some(path) = lookup(ENV_PRIVATE_KEY_PATH) {
            self.github.private_key_path = Some(PathBuf::from(path));
        }
    }

    /// Target repositories, resolved against `owner`.
    pub fn repository_refs(&self) -> Result<Vec<RepositoryRef>> {
        self.repositories
            .iter()
            .map(|entry| parse_repository(entry, &self.owner))
            .collect()
    }

    /// Roles to grant: the configured list, or Contributor plus AKS RBAC
    /// Cluster Admin when a cluster is configured.
    pub fn roles(&self) -> Vec<RoleDefinition> {
        if let Some(roles) = &self.azure.roles {
            return roles.clone();
        }
        let mut roles = vec![RoleDefinition::contributor()];
        if self.azure.cluster_name.is_some() {
            roles.push(RoleDefinition::aks_rbac_cluster_admin());
        }
        roles
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.azure.propagation_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Pre-issued Azure tokens read through `lookup`.
    ///
    /// `None` when no token variables are configured or one of them is unset;
    /// the caller then falls back to the Azure CLI.
    pub fn static_azure_credential(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<StaticCredential> {
        let graph_var = self.azure.graph_token_env.as_deref()?;
        let management_var = self.azure.management_token_env.as_deref()?;

        let Some(graph_token) = lookup(graph_var) else {
            tracing::warn!("{} is not set, falling back to the Azure CLI", graph_var);
            return None;
        };
        let Some(management_token) = lookup(management_var) else {
            tracing::warn!("{} is not set, falling back to the Azure CLI", management_var);
            return None;
        };

        Some(
            StaticCredential::new()
                .with_token(GRAPH_SCOPE, graph_token)
                .with_token(ARM_SCOPE, management_token),
        )
    }

    /// GitHub App identity; all three settings are required.
    pub fn github_app(&self) -> Result<GitHubAppConfig> {
        let app_id = self
            .github
            .app_id
            .clone()
            .with_context(|| format!("GitHub App id not configured (set {})", ENV_APP_ID))?;
        let installation_id = self.github.installation_id.clone().with_context(|| {
            format!(
                "GitHub App installation id not configured (set {})",
                ENV_INSTALLATION_ID
            )
        })?;
        let private_key_path = self.github.private_key_path.clone().with_context(|| {
            format!(
                "GitHub App private key path not configured (set {})",
                ENV_PRIVATE_KEY_PATH
            )
        })?;

        Ok(GitHubAppConfig::new(app_id, installation_id, private_key_path)
            .with_api_url(self.github.api_url.clone()))
    }

    pub fn run_plan(&self) -> Result<RunPlan> {
        Ok(RunPlan {
            repositories: self.repository_refs()?,
            application_name: self.application.name.clone(),
            application_description: self.application.description.clone(),
            credential_name: self.federation.credential_name.clone(),
            branches: self.federation.branches.clone(),
            cluster_name: self.azure.cluster_name.clone(),
            container_registry: self.azure.container_registry.clone(),
        })
    }
}

/// Parse `name` or `owner/name`.
pub fn parse_repository(entry: &str, default_owner: &str) -> Result<RepositoryRef> {
    let entry = entry.trim();
    match entry.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(RepositoryRef::new(owner, name))
        }
        None if !entry.is_empty() => Ok(RepositoryRef::new(default_owner, entry)),
        _ => bail!("invalid repository '{}', expected 'name' or 'owner/name'", entry),
    }
}

/// Load configuration from `path`, or from the platform config directory.
pub fn load_config(path: Option<&Path>) -> Result<FedlinkConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    if !config_path.exists() {
        bail!("No configuration found at {:?}", config_path);
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;
    let mut config = FedlinkConfig::parse(&contents, &config_path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "fedlink")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
owner = "octo"
repositories = ["infra", "platform/api"]

[application]
name = "deployer"

[azure]
resource_group = "deploy-rg"
"#;

    fn parse(contents: &str) -> Result<FedlinkConfig> {
        FedlinkConfig::parse(contents, Path::new("fedlink.toml"))
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse(MINIMAL).unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.federation.branches, vec!["main"]);
        assert_eq!(config.propagation_delay(), Duration::from_secs(30));
        assert_eq!(config.github.api_url.as_str(), "https://api.github.com/");
        assert_eq!(config.roles(), vec![RoleDefinition::contributor()]);
    }

    #[test]
    fn test_cluster_adds_aks_role() {
        let contents = MINIMAL.replace(
            "resource_group = \"deploy-rg\"",
            "resource_group = \"deploy-rg\"\ncluster_name = \"aks-1\"",
        );
        let config = parse(&contents).unwrap();

        assert_eq!(
            config.roles(),
            vec![
                RoleDefinition::contributor(),
                RoleDefinition::aks_rbac_cluster_admin()
            ]
        );
    }

    #[test]
    fn test_explicit_roles_replace_defaults() {
        let contents = format!(
            "{}\n[[azure.roles]]\nid = \"acdd72a7-3385-48ef-bd42-f606fba81ae7\"\nname = \"Reader\"\n",
            MINIMAL
        );
        let config = parse(&contents).unwrap();

        assert_eq!(config.roles().len(), 1);
        assert_eq!(config.roles()[0].name, "Reader");
    }

    #[test]
    fn test_repository_refs_resolve_owner() {
        let config = parse(MINIMAL).unwrap();
        let repos = config.repository_refs().unwrap();

        assert_eq!(repos[0], RepositoryRef::new("octo", "infra"));
        assert_eq!(repos[1], RepositoryRef::new("platform", "api"));
    }

    #[test]
    fn test_invalid_repository_entry() {
        assert!(parse_repository("a/b/c", "octo").is_err());
        assert!(parse_repository("/b", "octo").is_err());
        assert!(parse_repository("", "octo").is_err());
    }

    #[test]
    fn test_empty_repositories_rejected() {
        let contents = MINIMAL.replace(r#"["infra", "platform/api"]"#, "[]");
        assert!(parse(&contents).is_err());
    }

    #[test]
    fn test_env_overrides_github_app() {
        let mut config = parse(MINIMAL).unwrap();
        assert!(config.github_app().is_err());

        let env: HashMap<&str, &str> = [
            (ENV_APP_ID, "12345"),
            (ENV_INSTALLATION_ID, "67890"),
            (ENV_PRIVATE_KEY_PATH, "/etc/fedlink/app.pem"),
        ]
        .into();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        let app = config.github_app().unwrap();
        assert_eq!(app.app_id, "12345");
        assert_eq!(app.installation_id, "67890");
        assert_eq!(app.private_key_path, PathBuf::from("/etc/fedlink/app.pem"));
    }

    #[test]
    fn test_timeout_is_top_level() {
        let config = parse(&format!("timeout_secs = 5\n{}", MINIMAL)).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(parse(MINIMAL).unwrap().timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_token_variables_must_be_paired() {
        let contents = MINIMAL.replace(
            "resource_group = \"deploy-rg\"",
            "resource_group = \"deploy-rg\"\ngraph_token_env = \"GRAPH_TOKEN\"",
        );
        let err = parse(&contents).unwrap_err();
        assert!(err.to_string().contains("management_token_env"));
    }

    #[tokio::test]
    async fn test_static_azure_credential_per_scope() {
        use fedlink_core::AzureCredential;

        let contents = MINIMAL.replace(
            "resource_group = \"deploy-rg\"",
            "resource_group = \"deploy-rg\"\ngraph_token_env = \"GRAPH_TOKEN\"\nmanagement_token_env = \"ARM_TOKEN\"",
        );
        let config = parse(&contents).unwrap();

        let env: HashMap<&str, &str> =
            [("GRAPH_TOKEN", "g-token"), ("ARM_TOKEN", "m-token")].into();
        let credential = config
            .static_azure_credential(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        let graph = credential.access_token(GRAPH_SCOPE).await.unwrap();
        let arm = credential.access_token(ARM_SCOPE).await.unwrap();
        assert_eq!(graph.value.expose(), "g-token");
        assert_eq!(arm.value.expose(), "m-token");

        let partial: HashMap<&str, &str> = [("GRAPH_TOKEN", "g-token")].into();
        let fallback =
            config.static_azure_credential(|key| partial.get(key).map(|v| v.to_string()));
        assert!(fallback.is_none());
        assert!(parse(MINIMAL).unwrap().static_azure_credential(|_| None).is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fedlink.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.application.name, "deployer");

        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
