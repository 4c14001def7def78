//! End-to-end deployment: provisioning followed by optional publishing.

use anyhow::Result;

use crate::{
    cloud::CloudApi,
    config::DeploymentConfig,
    provisioner::{ProvisionResult, Provisioner},
    publish::{GitWorkingTree, GithubClient, Publisher, RepositoryHost, SourceTree},
    wait::Waiter,
};

/// One deployment run.
pub struct Deployment<'a, C, H = GithubClient, T = GitWorkingTree> {
    config: &'a DeploymentConfig,
    cloud: &'a C,
    publisher: Option<Publisher<H, T>>,
    waiter: Waiter,
}

impl<'a, C: CloudApi> Deployment<'a, C> {
    /// Deployment publishing to GitHub when the configuration carries a token.
    pub fn new(config: &'a DeploymentConfig, cloud: &'a C) -> Result<Self> {
        let publisher = config
            .repo_token
            .as_ref()
            .map(|token| Publisher::github(config, token))
            .transpose()?;

        Ok(Self {
            config,
            cloud,
            publisher,
            waiter: Waiter::default(),
        })
    }
}

impl<'a, C, H, T> Deployment<'a, C, H, T>
where
    C: CloudApi,
    H: RepositoryHost,
    T: SourceTree,
{
    /// Replace the publisher.
    pub fn with_publisher<H2, T2>(self, publisher: Publisher<H2, T2>) -> Deployment<'a, C, H2, T2> {
        Deployment {
            config: self.config,
            cloud: self.cloud,
            publisher: Some(publisher),
            waiter: self.waiter,
        }
    }

    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Provision every resource, then publish when a publisher is set.
    ///
    /// Publishing failures never unwind provisioned resources.
    pub async fn run(&self) -> Result<ProvisionResult> {
        let mut result = Provisioner::new(self.config, self.cloud)
            .with_waiter(self.waiter)
            .provision()
            .await?;

        match &self.publisher {
            Some(publisher) => {
                result.repository_url = publisher.publish(&result).await?;
            }
            None => tracing::debug!("No repository token configured, skipping publishing"),
        }

        tracing::info!(
            service_name = %result.service_name,
            repository_url = ?result.repository_url,
            "Deployment complete"
        );
        Ok(result)
    }
}
