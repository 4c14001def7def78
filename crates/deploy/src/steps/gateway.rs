//! REST API exposing the function over HTTP.

use anyhow::{Context, Result};

use super::{ProvisionStep, StepOutcome};
use crate::{
    cloud::{CloudApi, Creation, InvokeGrant},
    config::DeploymentConfig,
    handler::contract::COLLECTION_PATH,
};

/// Responses above this many bytes are compressed.
pub const MINIMUM_COMPRESSION_SIZE: u32 = 1024;

/// Methods served on the collection resource.
pub const COLLECTION_METHODS: [&str; 3] = ["GET", "POST", "DELETE"];

/// Methods served on the `{id}` child resource.
pub const ITEM_METHODS: [&str; 2] = ["GET", "DELETE"];

/// Principal the function grants invoke permission to.
pub const GATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpGateway {
    pub name: String,
    pub region: String,
    pub stage_name: String,
}

impl HttpGateway {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            name: config.api_name(),
            region: config.region.clone(),
            stage_name: config.stage_name.clone(),
        }
    }

    /// Lambda invocation URI used by the proxy integrations.
    pub fn integration_uri(&self, function_arn: &str) -> String {
        format!(
            "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
            self.region, function_arn
        )
    }

    /// Execute ARN covering every stage, method and path of an API.
    pub fn execute_arn(&self, account_id: &str, api_id: &str) -> String {
        format!("arn:aws:execute-api:{}:{}:{}/*", self.region, account_id, api_id)
    }

    async fn lookup<C: CloudApi>(&self, cloud: &C) -> Result<Option<String>> {
        cloud
            .find_rest_api(&self.name)
            .await
            .with_context(|| format!("Failed to look up REST API {}", self.name))
    }

    async fn configure<C: CloudApi>(&self, cloud: &C, api_id: &str, function_arn: &str) -> Result<()> {
        let root_id = cloud
            .root_resource_id(api_id)
            .await
            .with_context(|| format!("Failed to find root resource of API {}", api_id))?;

        let collection_part = COLLECTION_PATH.trim_start_matches('/');
        let collection_id = cloud
            .create_resource(api_id, &root_id, collection_part)
            .await
            .with_context(|| format!("Failed to create resource {}", COLLECTION_PATH))?;
        let item_id = cloud
            .create_resource(api_id, &collection_id, "{id}")
            .await
            .with_context(|| format!("Failed to create resource {}/{{id}}", COLLECTION_PATH))?;

        let uri = self.integration_uri(function_arn);
        let routes = COLLECTION_METHODS
            .iter()
            .map(|method| (collection_id.as_str(), *method))
            .chain(ITEM_METHODS.iter().map(|method| (item_id.as_str(), *method)));
        for (resource_id, method) in routes {
            tracing::debug!(api_id, resource_id, method, "Registering method");
            cloud
                .put_method(api_id, resource_id, method)
                .await
                .with_context(|| format!("Failed to register {} method", method))?;
            cloud
                .put_proxy_integration(api_id, resource_id, method, &uri)
                .await
                .with_context(|| format!("Failed to integrate {} method with the function", method))?;
        }

        let grant = InvokeGrant {
            statement_id: format!("apigateway-{}", api_id),
            principal: GATEWAY_PRINCIPAL.to_string(),
            source_arn: self.execute_arn(account_id(function_arn)?, api_id),
        };
        if let Creation::AlreadyExists = cloud
            .grant_invoke(function_arn, &grant)
            .await
            .context("Failed to let the API invoke the function")?
        {
            tracing::debug!(statement_id = %grant.statement_id, "Invoke permission already granted");
        }

        cloud
            .create_deployment(api_id, &self.stage_name)
            .await
            .with_context(|| format!("Failed to deploy API {} to stage {}", api_id, self.stage_name))
    }
}

/// Account id segment of an ARN.
pub fn account_id(arn: &str) -> Result<&str> {
    arn.split(':')
        .nth(4)
        .filter(|account| !account.is_empty())
        .with_context(|| format!("No account id in ARN {}", arn))
}

impl ProvisionStep for HttpGateway {
    type Input = String;
    type Output = String;

    const STEP_NAME: &'static str = "HTTP gateway";

    async fn ensure<C: CloudApi>(&self, cloud: &C, function_arn: String) -> Result<StepOutcome<String>> {
        if let Some(api_id) = self.lookup(cloud).await? {
            // An existing API is not reconfigured.
            tracing::info!(api = %self.name, %api_id, "REST API already exists");
            return Ok(StepOutcome::AlreadyExists(api_id));
        }

        let api_id = match cloud
            .create_rest_api(&self.name, MINIMUM_COMPRESSION_SIZE)
            .await
            .with_context(|| format!("Failed to create REST API {}", self.name))?
        {
            Creation::Created(api_id) => api_id,
            Creation::AlreadyExists => {
                let api_id = self.lookup(cloud).await?.with_context(|| {
                    format!("REST API {} was reported as existing but not found", self.name)
                })?;
                return Ok(StepOutcome::AlreadyExists(api_id));
            }
        };

        self.configure(cloud, &api_id, &function_arn).await?;

        tracing::info!(api = %self.name, %api_id, stage = %self.stage_name, "REST API deployed");
        Ok(StepOutcome::Created(api_id))
    }
}
