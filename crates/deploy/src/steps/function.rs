//! Compute function serving the item collection.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use super::{ProvisionStep, StepOutcome};
use crate::{
    cloud::{CloudApi, Creation, FunctionDefinition, FunctionInfo},
    config::DeploymentConfig,
    handler::{HANDLER_ENTRYPOINT, HandlerPackage},
    wait::Waiter,
};

/// Environment variable holding the table name inside the function.
pub const TABLE_NAME_ENV: &str = "TABLE_NAME";

/// Identifiers the function depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInputs {
    pub role_arn: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeFunction {
    pub name: String,
    pub runtime: String,
    pub memory_size: u32,
    pub timeout_seconds: u32,
    /// Initialized instances kept on the published version. Zero skips it.
    pub provisioned_concurrency: u32,
    pub waiter: Waiter,
}

impl ComputeFunction {
    pub fn from_config(config: &DeploymentConfig, waiter: Waiter) -> Self {
        Self {
            name: config.function_name(),
            runtime: config.runtime_id.clone(),
            memory_size: config.memory_size,
            timeout_seconds: config.timeout_seconds,
            provisioned_concurrency: config.provisioned_concurrency,
            waiter,
        }
    }

    fn definition(&self, inputs: &FunctionInputs, package: HandlerPackage) -> FunctionDefinition {
        FunctionDefinition {
            name: self.name.clone(),
            runtime: self.runtime.clone(),
            role_arn: inputs.role_arn.clone(),
            handler: HANDLER_ENTRYPOINT.to_string(),
            package: package.into_bytes(),
            memory_size: self.memory_size,
            timeout_seconds: self.timeout_seconds,
            environment: BTreeMap::from([(
                TABLE_NAME_ENV.to_string(),
                inputs.table_name.clone(),
            )]),
        }
    }

    async fn lookup<C: CloudApi>(&self, cloud: &C) -> Result<Option<FunctionInfo>> {
        cloud
            .get_function(&self.name)
            .await
            .with_context(|| format!("Failed to look up function {}", self.name))
    }

    /// Whether the deployed code differs from the freshly rendered package.
    /// An unknown digest is not drift.
    fn drifted(existing: &FunctionInfo, package: &HandlerPackage) -> bool {
        existing
            .code_sha256
            .as_deref()
            .is_some_and(|deployed| deployed != package.sha256())
    }

    /// Existing functions are never updated, only compared.
    fn warn_on_drift(&self, existing: &FunctionInfo, package: &HandlerPackage) {
        if Self::drifted(existing, package) {
            tracing::warn!(
                function = %self.name,
                deployed = ?existing.code_sha256,
                rendered = package.sha256(),
                "Deployed function code differs from the rendered handler and is left unchanged"
            );
        }
    }

    async fn activate<C: CloudApi>(&self, cloud: &C) -> Result<()> {
        let name = self.name.as_str();
        tracing::info!(function = %name, "Waiting for function to become active");
        self.waiter
            .until_ready(name, move || async move {
                cloud
                    .function_state(name)
                    .await
                    .with_context(|| format!("Failed to read state of function {}", name))
            })
            .await?;

        let version = cloud
            .publish_version(name)
            .await
            .with_context(|| format!("Failed to publish a version of function {}", name))?;
        tracing::debug!(function = %name, %version, "Published version");

        if self.provisioned_concurrency > 0 {
            cloud
                .put_provisioned_concurrency(name, &version, self.provisioned_concurrency)
                .await
                .with_context(|| {
                    format!("Failed to configure provisioned concurrency for {}", name)
                })?;
            tracing::debug!(
                function = %name,
                %version,
                executions = self.provisioned_concurrency,
                "Configured provisioned concurrency"
            );
        }
        Ok(())
    }
}

impl ProvisionStep for ComputeFunction {
    type Input = FunctionInputs;
    type Output = String;

    const STEP_NAME: &'static str = "compute function";

    async fn ensure<C: CloudApi>(
        &self,
        cloud: &C,
        input: FunctionInputs,
    ) -> Result<StepOutcome<String>> {
        let package = HandlerPackage::build(&input.table_name)?;

        if let Some(existing) = self.lookup(cloud).await? {
            tracing::info!(function = %self.name, arn = %existing.arn, "Function already exists");
            self.warn_on_drift(&existing, &package);
            return Ok(StepOutcome::AlreadyExists(existing.arn));
        }

        let definition = self.definition(&input, package);
        let arn = match cloud
            .create_function(&definition)
            .await
            .with_context(|| format!("Failed to create function {}", self.name))?
        {
            Creation::Created(arn) => arn,
            Creation::AlreadyExists => {
                let existing = self.lookup(cloud).await?.with_context(|| {
                    format!("Function {} was reported as existing but not found", self.name)
                })?;
                tracing::info!(function = %self.name, "Function created concurrently, reusing it");
                return Ok(StepOutcome::AlreadyExists(existing.arn));
            }
        };

        self.activate(cloud).await?;

        tracing::info!(function = %self.name, %arn, "Function created");
        Ok(StepOutcome::Created(arn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        FunctionApi,
        memory::{Call, MemoryCloud},
    };

    fn inputs() -> FunctionInputs {
        FunctionInputs {
            role_arn: "arn:aws:iam::123456789012:role/demo-lambda-role".to_string(),
            table_name: "demo-table".to_string(),
        }
    }

    fn function(config: &DeploymentConfig) -> ComputeFunction {
        ComputeFunction::from_config(config, Waiter::immediate(5))
    }

    #[tokio::test]
    async fn test_creates_function_bound_to_role_and_table() {
        let cloud = MemoryCloud::new("us-east-1").slow_to_ready(1);
        let config = DeploymentConfig::new("demo", "us-east-1");
        let outcome = function(&config).ensure(&cloud, inputs()).await.unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Created(
                "arn:aws:lambda:us-east-1:123456789012:function:demo-function".to_string()
            )
        );

        let definition = cloud.function_definition("demo-function").unwrap();
        assert_eq!(definition.role_arn, inputs().role_arn);
        assert_eq!(definition.handler, "handler.handler");
        assert_eq!(definition.runtime, "python3.12");
        assert_eq!(definition.memory_size, 1024);
        assert_eq!(definition.timeout_seconds, 30);
        assert_eq!(definition.environment[TABLE_NAME_ENV], "demo-table");
        assert_eq!(
            definition.package,
            HandlerPackage::build("demo-table").unwrap().into_bytes()
        );

        let calls = cloud.calls();
        assert!(calls.contains(&Call::PutProvisionedConcurrency {
            qualifier: "1".to_string(),
            executions: 5,
        }));
        let publish = cloud.position("PublishVersion").unwrap();
        let last_poll = calls
            .iter()
            .rposition(|call| matches!(call, Call::FunctionState(_)))
            .unwrap();
        assert!(last_poll < publish);
    }

    #[tokio::test]
    async fn test_zero_concurrency_skips_configuration() {
        let cloud = MemoryCloud::new("us-east-1");
        let config = DeploymentConfig {
            provisioned_concurrency: 0,
            ..DeploymentConfig::new("demo", "us-east-1")
        };
        function(&config).ensure(&cloud, inputs()).await.unwrap();

        assert!(cloud.position("PublishVersion").is_some());
        assert!(cloud.position("PutProvisionedConcurrency").is_none());
    }

    #[tokio::test]
    async fn test_existing_function_is_not_updated() {
        let cloud = MemoryCloud::new("us-east-1");
        let arn = cloud.insert_function("demo-function", "stale-digest");
        let config = DeploymentConfig::new("demo", "us-east-1");

        let outcome = function(&config).ensure(&cloud, inputs()).await.unwrap();
        assert_eq!(outcome, StepOutcome::AlreadyExists(arn));
        assert_eq!(cloud.calls(), vec![Call::GetFunction("demo-function".to_string())]);
    }

    #[test]
    fn test_drift_compares_code_digests() {
        let package = HandlerPackage::build("demo-table").unwrap();
        let info = |code_sha256: Option<&str>| FunctionInfo {
            arn: "arn:aws:lambda:us-east-1:123456789012:function:demo-function".to_string(),
            code_sha256: code_sha256.map(str::to_string),
        };

        assert!(ComputeFunction::drifted(&info(Some("stale-digest")), &package));
        assert!(!ComputeFunction::drifted(&info(Some(package.sha256())), &package));
        assert!(!ComputeFunction::drifted(&info(None), &package));
    }

    #[tokio::test]
    async fn test_reused_function_with_current_code_has_not_drifted() {
        let cloud = MemoryCloud::new("us-east-1");
        let config = DeploymentConfig::new("demo", "us-east-1");
        function(&config).ensure(&cloud, inputs()).await.unwrap();

        let existing = cloud.get_function("demo-function").await.unwrap().unwrap();
        let package = HandlerPackage::build("demo-table").unwrap();
        assert!(!ComputeFunction::drifted(&existing, &package));
    }

    #[tokio::test]
    async fn test_concurrent_creation_is_reused() {
        let cloud = MemoryCloud::new("us-east-1");
        let config = DeploymentConfig::new("demo", "us-east-1");
        let first = function(&config).ensure(&cloud, inputs()).await.unwrap().into_value();
        cloud.hide_once("demo-function");
        cloud.clear_calls();

        let second = function(&config).ensure(&cloud, inputs()).await.unwrap();
        assert_eq!(second, StepOutcome::AlreadyExists(first));
        assert_eq!(
            cloud.calls(),
            vec![
                Call::GetFunction("demo-function".to_string()),
                Call::CreateFunction("demo-function".to_string()),
                Call::GetFunction("demo-function".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_function_aborts() {
        let cloud = MemoryCloud::new("us-east-1").never_ready();
        let config = DeploymentConfig::new("demo", "us-east-1");

        let err = function(&config).ensure(&cloud, inputs()).await.unwrap_err();
        assert!(err.to_string().contains("failed state"));
        assert!(cloud.position("PublishVersion").is_none());
    }
}
