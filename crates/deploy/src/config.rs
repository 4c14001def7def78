//! Deployment configuration.
//!
//! A [`DeploymentConfig`] is resolved once per run from layered sources
//! (built-in defaults, an optional TOML file, `CRUDFORGE_*` environment
//! variables and finally command line overrides) and is never mutated after
//! [`DeploymentConfig::resolve`] returns it.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use derive_more::{Deref, From};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

/// The default name for the crudforge configuration file.
pub const CONFIG_FILENAME: &str = "Crudforge.toml";

/// Prefix of the environment variables merged into the configuration.
pub const ENV_PREFIX: &str = "CRUDFORGE_";

/// Default Lambda runtime identifier for the generated handler.
pub const DEFAULT_RUNTIME: &str = "python3.12";
/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";
/// Default API Gateway stage.
pub const DEFAULT_STAGE: &str = "prod";
/// Default branch the published repository is pushed to.
pub const DEFAULT_BRANCH: &str = "main";
/// Default hosting platform API endpoint.
pub const DEFAULT_HOSTING_API_URL: &str = "https://api.github.com";

/// Managed policy granting CloudWatch Logs access to the function.
pub const BASIC_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";
/// Managed policy granting the function access to DynamoDB.
pub const DYNAMODB_ACCESS_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonDynamoDBFullAccess";

/// Longest service name that still fits every derived resource name.
///
/// IAM role names are capped at 64 characters and the role name carries the
/// longest suffix (`-lambda-role`).
pub const MAX_SERVICE_NAME_LEN: usize = 52;

/// What to do when a resource with the derived name already exists.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExistingResourcePolicy {
    /// Return the identifier of the existing resource.
    #[default]
    Reuse,
    /// Abort the run.
    Fail,
}

/// How failures while publishing the repository affect the run.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PublishFailurePolicy {
    /// Log the failure and return a result without a repository URL.
    #[default]
    Lenient,
    /// Propagate the failure to the caller.
    Strict,
}

/// Bearer credential for the hosting platform.
///
/// Never printed and never written back to disk.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct RepoToken(String);

impl fmt::Debug for RepoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RepoToken(***)")
    }
}

/// Settings for the optional repository publishing path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Branch pushed to and watched by the CI workflow.
    pub branch: String,
    /// Local directory holding the service sources.
    pub source_dir: PathBuf,
    /// Hosting platform API base URL.
    pub api_url: Url,
    /// Whether the created repository is private.
    pub private: bool,
    /// Failure handling for the publishing path.
    pub on_failure: PublishFailurePolicy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            branch: DEFAULT_BRANCH.to_string(),
            source_dir: PathBuf::from("."),
            api_url: Url::parse(DEFAULT_HOSTING_API_URL).expect("default API URL is valid"),
            private: false,
            on_failure: PublishFailurePolicy::default(),
        }
    }
}

/// Every parameter of a deployment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Base name every resource name is derived from.
    pub service_name: String,
    /// AWS region hosting every resource.
    pub region: String,
    /// Lambda runtime identifier.
    pub runtime_id: String,
    /// Function memory in MiB.
    pub memory_size: u32,
    /// Function timeout in seconds.
    pub timeout_seconds: u32,
    /// Pre-warmed instances on the published version. Zero disables it.
    pub provisioned_concurrency: u32,
    /// Table read capacity units.
    pub table_read_capacity: u64,
    /// Table write capacity units.
    pub table_write_capacity: u64,
    /// Hosting platform credential. Publishing only happens when set.
    #[serde(skip_serializing)]
    pub repo_token: Option<RepoToken>,
    /// Expected owner of the published repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_owner: Option<String>,
    /// API Gateway stage the API is deployed to.
    pub stage_name: String,
    /// Pause after creating the role, for IAM propagation.
    pub role_propagation_secs: u64,
    /// Managed policies attached to a newly created role.
    pub role_policies: Vec<String>,
    /// Reuse policy for resources that already exist.
    pub on_existing: ExistingResourcePolicy,
    /// Repository publishing settings.
    pub publish: PublishConfig,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            region: DEFAULT_REGION.to_string(),
            runtime_id: DEFAULT_RUNTIME.to_string(),
            memory_size: 1024,
            timeout_seconds: 30,
            provisioned_concurrency: 5,
            table_read_capacity: 5,
            table_write_capacity: 5,
            repo_token: None,
            repo_owner: None,
            stage_name: DEFAULT_STAGE.to_string(),
            role_propagation_secs: 10,
            role_policies: vec![
                BASIC_EXECUTION_POLICY_ARN.to_string(),
                DYNAMODB_ACCESS_POLICY_ARN.to_string(),
            ],
            on_existing: ExistingResourcePolicy::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("service_name", &self.service_name)
            .field("region", &self.region)
            .field("runtime_id", &self.runtime_id)
            .field("memory_size", &self.memory_size)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("provisioned_concurrency", &self.provisioned_concurrency)
            .field("table_read_capacity", &self.table_read_capacity)
            .field("table_write_capacity", &self.table_write_capacity)
            .field("repo_token", &self.repo_token.as_ref().map(|_| "***"))
            .field("repo_owner", &self.repo_owner)
            .field("stage_name", &self.stage_name)
            .field("on_existing", &self.on_existing)
            .field("publish", &self.publish)
            .finish_non_exhaustive()
    }
}

impl DeploymentConfig {
    /// Create a configuration with default sizing for the given service.
    pub fn new(service_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Build the layered configuration sources.
    ///
    /// `path` may point at a TOML file or at a directory containing
    /// [`CONFIG_FILENAME`]. Environment variables use [`ENV_PREFIX`] and `__`
    /// to reach nested keys (`CRUDFORGE_PUBLISH__BRANCH`).
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Configuration file or directory not found: {}", path.display());
            }
            let config_path = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.to_path_buf()
            };
            figment = figment.merge(Toml::file(config_path));
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract, complete and validate the configuration.
    ///
    /// A memorable service name is generated when none was provided.
    pub fn resolve(figment: Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .context("Failed to resolve deployment configuration")?;

        if config.service_name.trim().is_empty() {
            let name = names::Generator::default()
                .next()
                .unwrap_or_else(|| "service".to_string());
            config.service_name = format!("crud-{}", name);
            tracing::info!(service_name = %config.service_name, "Generated service name");
        }

        config.validate()?;
        Ok(config)
    }

    /// Check names and sizing against the platform limits.
    pub fn validate(&self) -> Result<()> {
        let name = &self.service_name;
        if name.is_empty() || name.len() > MAX_SERVICE_NAME_LEN {
            anyhow::bail!(
                "Service name must be between 1 and {} characters, got {:?}",
                MAX_SERVICE_NAME_LEN,
                name
            );
        }
        if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            anyhow::bail!("Service name must start with a letter: {:?}", name);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!(
                "Service name may only contain letters, digits, '-' and '_': {:?}",
                name
            );
        }

        if self.region.is_empty()
            || !self
                .region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!("Invalid AWS region: {:?}", self.region);
        }

        if self.runtime_id.trim().is_empty() {
            anyhow::bail!("Runtime identifier must not be empty");
        }
        if !(128..=10240).contains(&self.memory_size) {
            anyhow::bail!(
                "Memory size must be between 128 and 10240 MiB, got {}",
                self.memory_size
            );
        }
        if !(1..=900).contains(&self.timeout_seconds) {
            anyhow::bail!(
                "Timeout must be between 1 and 900 seconds, got {}",
                self.timeout_seconds
            );
        }
        if self.table_read_capacity == 0 || self.table_write_capacity == 0 {
            anyhow::bail!("Table read and write capacity must be at least 1");
        }

        if self.stage_name.is_empty()
            || !self
                .stage_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("Invalid stage name: {:?}", self.stage_name);
        }

        if self.publish.branch.trim().is_empty() {
            anyhow::bail!("Publish branch must not be empty");
        }

        Ok(())
    }

    /// Name of the function's execution role.
    pub fn role_name(&self) -> String {
        format!("{}-lambda-role", self.service_name)
    }

    /// Name of the data table.
    pub fn table_name(&self) -> String {
        format!("{}-table", self.service_name)
    }

    /// Name of the compute function.
    pub fn function_name(&self) -> String {
        format!("{}-function", self.service_name)
    }

    /// Name of the REST API.
    pub fn api_name(&self) -> String {
        format!("{}-api", self.service_name)
    }

    /// Name of the published repository.
    pub fn repository_name(&self) -> String {
        self.service_name.clone()
    }

    /// Whether the repository publishing path runs.
    pub fn wants_publish(&self) -> bool {
        self.repo_token.is_some()
    }

    /// Save the configuration to a TOML file. The token is never written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployment config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}
