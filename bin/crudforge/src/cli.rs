use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use crudforge_deploy::{DeploymentConfig, ExistingResourcePolicy, PublishFailurePolicy};
use figment::providers::Serialized;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "crudforge")]
#[command(
    author,
    version,
    about = "Provision a serverless CRUD service on AWS in a single command"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "CRUDFORGE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision the role, table, function and REST API, then publish the
    /// sources when a repository token is configured.
    Deploy {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write the provisioning result as JSON to this file.
        #[arg(short, long, env = "CRUDFORGE_OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Print the resolved configuration and the derived resource names
    /// without calling any API.
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Save the resolved configuration as TOML to this file.
        #[arg(long, env = "CRUDFORGE_SAVE")]
        save: Option<PathBuf>,
    },

    /// Print a rendered asset.
    Render {
        #[arg(value_enum)]
        asset: Asset,

        #[command(flatten)]
        config: ConfigArgs,

        /// Provisioning result the workflow is rendered for.
        ///
        /// Required for the workflow, which names the deployed function.
        #[arg(long, env = "CRUDFORGE_RESULT")]
        result: Option<PathBuf>,
    },

    /// Check a deployed stage against the handler contract.
    Smoke {
        /// Base URL of the deployed stage.
        #[arg(long, env = "CRUDFORGE_URL", conflicts_with = "result")]
        url: Option<Url>,

        /// Provisioning result to read the invoke URL from.
        #[arg(long, env = "CRUDFORGE_RESULT", required_unless_present = "url")]
        result: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Asset {
    /// The function handler rendered for the configured table.
    Handler,
    /// The CI workflow redeploying the function.
    Workflow,
}

/// Configuration sources and per-run overrides.
///
/// Every override is optional and only replaces the value coming from the
/// configuration file or the `CRUDFORGE_*` environment when given.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub struct ConfigArgs {
    /// Path to a Crudforge.toml file, or to a directory containing one.
    #[arg(short, long, alias = "conf", env = "CRUDFORGE_CONFIG")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Base name every resource name is derived from.
    ///
    /// If not provided, a memorable name is generated: crud-<adjective>-<noun>.
    #[arg(short = 'n', long, visible_alias = "name", env = "CRUDFORGE_SERVICE_NAME")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// AWS region hosting every resource.
    #[arg(short, long, env = "CRUDFORGE_REGION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Lambda runtime identifier.
    #[arg(long, alias = "runtime", env = "CRUDFORGE_RUNTIME_ID")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,

    /// Function memory in MiB.
    #[arg(long, alias = "memory", env = "CRUDFORGE_MEMORY_SIZE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u32>,

    /// Function timeout in seconds.
    #[arg(long, alias = "timeout", env = "CRUDFORGE_TIMEOUT_SECONDS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,

    /// Pre-warmed instances on the published version. Zero disables it.
    #[arg(long, alias = "concurrency", env = "CRUDFORGE_PROVISIONED_CONCURRENCY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned_concurrency: Option<u32>,

    /// Table read capacity units.
    #[arg(long, alias = "rcu", env = "CRUDFORGE_TABLE_READ_CAPACITY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_read_capacity: Option<u64>,

    /// Table write capacity units.
    #[arg(long, alias = "wcu", env = "CRUDFORGE_TABLE_WRITE_CAPACITY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_write_capacity: Option<u64>,

    /// Token for the hosting platform. Publishing only happens when set.
    #[arg(long, env = "CRUDFORGE_REPO_TOKEN", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_token: Option<String>,

    /// Expected owner of the published repository.
    #[arg(long, env = "CRUDFORGE_REPO_OWNER")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_owner: Option<String>,

    /// API Gateway stage the REST API is deployed to.
    #[arg(long, alias = "stage", env = "CRUDFORGE_STAGE_NAME")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,

    /// Seconds to wait after creating the role, for IAM propagation.
    #[arg(long, env = "CRUDFORGE_ROLE_PROPAGATION_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_propagation_secs: Option<u64>,

    /// What to do with resources that already exist (reuse or fail).
    #[arg(long, env = "CRUDFORGE_ON_EXISTING")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_existing: Option<ExistingResourcePolicy>,

    #[command(flatten)]
    pub publish: PublishArgs,
}

/// Overrides of the repository publishing settings.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub struct PublishArgs {
    /// Branch pushed to and watched by the CI workflow.
    #[arg(long = "publish-branch", env = "CRUDFORGE_PUBLISH_BRANCH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Local directory holding the service sources.
    #[arg(long = "source-dir", env = "CRUDFORGE_PUBLISH_SOURCE_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,

    /// Hosting platform API base URL.
    #[arg(long = "hosting-api-url", env = "CRUDFORGE_PUBLISH_API_URL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<Url>,

    /// Create the repository as private.
    #[arg(long = "private-repo", env = "CRUDFORGE_PUBLISH_PRIVATE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,

    /// What a publishing failure does to the run (lenient or strict).
    #[arg(long = "on-publish-failure", env = "CRUDFORGE_PUBLISH_ON_FAILURE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<PublishFailurePolicy>,
}

impl ConfigArgs {
    /// Resolve the configuration: defaults, then the file, then the
    /// environment, then these overrides.
    pub fn resolve(&self) -> anyhow::Result<DeploymentConfig> {
        let figment = DeploymentConfig::figment(self.config.as_deref())?
            .merge(Serialized::defaults(self));
        DeploymentConfig::resolve(figment)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}
