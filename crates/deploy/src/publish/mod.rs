//! Optional publishing of the service sources to a hosted repository.
//!
//! Publishing creates the remote repository, pushes the local working tree to
//! it and installs a CI workflow redeploying the function on every push. It
//! never touches the cloud resources, and under the default lenient policy a
//! failure only drops the repository URL from the result.

use std::future::Future;

use anyhow::Result;

use crate::{
    config::{DeploymentConfig, PublishFailurePolicy, RepoToken},
    handler::{self, HANDLER_FILE},
    provisioner::ProvisionResult,
};

mod git;
mod github;
pub mod workflow;

pub use git::GitWorkingTree;
pub use github::GithubClient;

/// Status the host answers a create with when the name is already in use.
const NAME_TAKEN_STATUS: u16 = 422;

/// Failure while publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The hosting platform answered with an unexpected status.
    #[error("{operation} was rejected with status {status}: {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// A git subprocess exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Repository created on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedRepository {
    pub owner: String,
    pub name: String,
    /// Browser URL, reported as the result's repository URL.
    pub html_url: String,
    /// URL git pushes to.
    pub clone_url: String,
}

/// Code hosting platform API.
pub trait RepositoryHost: Send + Sync {
    /// Create a repository under the authenticated account.
    fn create_repository(
        &self,
        name: &str,
        private: bool,
    ) -> impl Future<Output = Result<HostedRepository, PublishError>> + Send;

    /// Look up a repository by name, under `owner` or else under the
    /// authenticated account. `None` when it does not exist.
    fn find_repository(
        &self,
        owner: Option<&str>,
        name: &str,
    ) -> impl Future<Output = Result<Option<HostedRepository>, PublishError>> + Send;

    /// Create or replace a file on a branch.
    fn put_file(
        &self,
        repository: &HostedRepository,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Local directory pushed to the repository.
pub trait SourceTree: Send + Sync {
    /// Write `file` unless it already exists. Returns whether it was written.
    fn write_if_absent(
        &self,
        file: &str,
        content: &str,
    ) -> impl Future<Output = Result<bool, PublishError>> + Send;

    /// Commit pending changes and push them to `branch` of `remote_url`.
    fn push(
        &self,
        remote_url: &str,
        branch: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Publishing parameters taken from the deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub repository: String,
    pub branch: String,
    pub private: bool,
    pub expected_owner: Option<String>,
    pub on_failure: PublishFailurePolicy,
}

impl PublishSettings {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            repository: config.repository_name(),
            branch: config.publish.branch.clone(),
            private: config.publish.private,
            expected_owner: config.repo_owner.clone(),
            on_failure: config.publish.on_failure,
        }
    }
}

/// Publishes a provisioned service to a repository host.
pub struct Publisher<H, T> {
    host: H,
    tree: T,
    settings: PublishSettings,
}

impl Publisher<GithubClient, GitWorkingTree> {
    /// Publisher pushing `publish.source_dir` to GitHub.
    pub fn github(config: &DeploymentConfig, token: &RepoToken) -> Result<Self> {
        let host = GithubClient::new(&config.publish.api_url, token.clone())?;
        let tree = GitWorkingTree::new(&config.publish.source_dir).with_token(token.clone());
        Ok(Self::new(host, tree, PublishSettings::from_config(config)))
    }
}

impl<H: RepositoryHost, T: SourceTree> Publisher<H, T> {
    pub fn new(host: H, tree: T, settings: PublishSettings) -> Self {
        Self {
            host,
            tree,
            settings,
        }
    }

    /// Publish and return the repository URL.
    ///
    /// Under [`PublishFailurePolicy::Lenient`] failures are logged and yield
    /// `None`; under [`PublishFailurePolicy::Strict`] they are returned.
    pub async fn publish(&self, result: &ProvisionResult) -> Result<Option<String>> {
        match self.try_publish(result).await {
            Ok(url) => {
                tracing::info!(repository = %url, "Repository published");
                Ok(Some(url))
            }
            Err(err) => match self.settings.on_failure {
                PublishFailurePolicy::Lenient => {
                    match &err {
                        PublishError::Rejected {
                            operation, status, ..
                        } => tracing::warn!(
                            operation,
                            status,
                            error = %err,
                            "Repository publishing rejected, continuing without a repository"
                        ),
                        _ => tracing::warn!(
                            error = %err,
                            "Repository publishing failed, continuing without a repository"
                        ),
                    }
                    Ok(None)
                }
                PublishFailurePolicy::Strict => {
                    Err(anyhow::Error::new(err).context("Failed to publish repository"))
                }
            },
        }
    }

    /// Repository left by an earlier run, once creation reported the name
    /// as taken. Any other repository state keeps the original rejection.
    async fn existing_repository(&self) -> Result<HostedRepository, PublishError> {
        let settings = &self.settings;
        match self
            .host
            .find_repository(settings.expected_owner.as_deref(), &settings.repository)
            .await?
        {
            Some(repository) => {
                tracing::info!(repository = %repository.html_url, "Reusing existing repository");
                Ok(repository)
            }
            None => Err(PublishError::Rejected {
                operation: "create repository",
                status: NAME_TAKEN_STATUS,
                message: format!(
                    "{} is taken but not accessible to this token",
                    settings.repository
                ),
            }),
        }
    }

    async fn try_publish(&self, result: &ProvisionResult) -> Result<String, PublishError> {
        let settings = &self.settings;
        tracing::info!(repository = %settings.repository, "Creating repository");
        let repository = match self
            .host
            .create_repository(&settings.repository, settings.private)
            .await
        {
            Ok(repository) => repository,
            Err(PublishError::Rejected {
                status: NAME_TAKEN_STATUS,
                ..
            }) => self.existing_repository().await?,
            Err(err) => return Err(err),
        };

        if let Some(expected) = settings.expected_owner.as_deref() {
            if expected != repository.owner {
                tracing::warn!(
                    expected,
                    owner = %repository.owner,
                    "Repository was created under a different owner than configured"
                );
            }
        }

        let source = handler::render(&result.table_name)?;
        if self.tree.write_if_absent(HANDLER_FILE, &source).await? {
            tracing::info!(file = HANDLER_FILE, "Wrote rendered handler into source directory");
        }

        tracing::info!(branch = %settings.branch, "Pushing source tree");
        self.tree
            .push(
                &repository.clone_url,
                &settings.branch,
                &format!("Deploy {}", result.service_name),
            )
            .await?;

        let workflow = workflow::render(result, &settings.branch)?;
        self.host
            .put_file(
                &repository,
                &settings.branch,
                workflow::WORKFLOW_PATH,
                workflow.as_bytes(),
                "Add deployment workflow",
            )
            .await?;
        tracing::info!(path = workflow::WORKFLOW_PATH, "Installed deployment workflow");

        Ok(repository.html_url)
    }
}


#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        fakes::{FakeHost, FakeTree},
        *,
    };
    use crate::provisioner::CreatedResources;

    fn result() -> ProvisionResult {
        ProvisionResult {
            service_name: "demo".to_string(),
            region: "us-east-1".to_string(),
            stage_name: "prod".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/demo-lambda-role".to_string(),
            table_name: "demo-table".to_string(),
            function_arn: "arn:aws:lambda:us-east-1:123456789012:function:demo-function"
                .to_string(),
            api_id: "abc123".to_string(),
            repository_url: None,
            created: CreatedResources::default(),
            provisioned_at: Utc::now(),
        }
    }

    fn settings(on_failure: PublishFailurePolicy) -> PublishSettings {
        PublishSettings {
            on_failure,
            ..PublishSettings::from_config(&DeploymentConfig::new("demo", "us-east-1"))
        }
    }

    #[tokio::test]
    async fn test_publish_pushes_and_installs_workflow() {
        let publisher = Publisher::new(
            FakeHost::default(),
            FakeTree::default(),
            settings(PublishFailurePolicy::Strict),
        );
        let url = publisher.publish(&result()).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://github.com/octocat/demo"));

        assert_eq!(*publisher.tree.written.lock().unwrap(), vec!["handler.py"]);
        assert_eq!(
            *publisher.tree.pushes.lock().unwrap(),
            vec![(
                "https://github.com/octocat/demo.git".to_string(),
                "main".to_string()
            )]
        );
        let files = publisher.host.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, ".github/workflows/deploy.yml");
        assert!(files[0].1.contains("demo-function"));
    }

    #[tokio::test]
    async fn test_lenient_rejection_yields_no_url() {
        let publisher = Publisher::new(
            FakeHost {
                reject_with: Some(422),
                ..Default::default()
            },
            FakeTree::default(),
            settings(PublishFailurePolicy::Lenient),
        );
        assert_eq!(publisher.publish(&result()).await.unwrap(), None);
        assert!(publisher.tree.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_taken_name_reuses_existing_repository() {
        let publisher = Publisher::new(
            FakeHost {
                reject_with: Some(422),
                existing: true,
                ..Default::default()
            },
            FakeTree::default(),
            settings(PublishFailurePolicy::Strict),
        );
        let url = publisher.publish(&result()).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://github.com/octocat/demo"));
        assert_eq!(publisher.tree.pushes.lock().unwrap().len(), 1);
        assert_eq!(publisher.host.files.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_taken_name_without_repository_stays_rejected() {
        let publisher = Publisher::new(
            FakeHost {
                reject_with: Some(422),
                ..Default::default()
            },
            FakeTree::default(),
            settings(PublishFailurePolicy::Strict),
        );
        let err = publisher.publish(&result()).await.unwrap_err();
        let publish_err = err.downcast_ref::<PublishError>().unwrap();
        assert!(matches!(publish_err, PublishError::Rejected { status: 422, .. }));
        assert!(publisher.tree.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strict_rejection_is_an_error() {
        let publisher = Publisher::new(
            FakeHost {
                reject_with: Some(401),
                ..Default::default()
            },
            FakeTree::default(),
            settings(PublishFailurePolicy::Strict),
        );
        let err = publisher.publish(&result()).await.unwrap_err();
        let publish_err = err.downcast_ref::<PublishError>().unwrap();
        assert!(matches!(publish_err, PublishError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_lenient_git_failure_skips_workflow() {
        let publisher = Publisher::new(
            FakeHost::default(),
            FakeTree {
                fail_push: true,
                ..Default::default()
            },
            settings(PublishFailurePolicy::Lenient),
        );
        assert_eq!(publisher.publish(&result()).await.unwrap(), None);
        assert!(publisher.host.files.lock().unwrap().is_empty());
    }
}
