//! Execution role assumed by the function.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use super::{ProvisionStep, StepOutcome};
use crate::{
    cloud::{CloudApi, Creation},
    config::DeploymentConfig,
};

/// Service principal allowed to assume the role.
pub const LAMBDA_PRINCIPAL: &str = "lambda.amazonaws.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRole {
    pub name: String,
    /// Managed policies attached after creation.
    pub policies: Vec<String>,
    /// Pause after attaching policies so the role is usable by the function.
    pub propagation_delay: Duration,
}

impl ExecutionRole {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            name: config.role_name(),
            policies: config.role_policies.clone(),
            propagation_delay: Duration::from_secs(config.role_propagation_secs),
        }
    }

    /// Trust policy letting the function service assume the role.
    pub fn trust_policy() -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": LAMBDA_PRINCIPAL },
                "Action": "sts:AssumeRole"
            }]
        })
    }

    async fn existing_arn<C: CloudApi>(&self, cloud: &C) -> Result<Option<String>> {
        cloud
            .get_role_arn(&self.name)
            .await
            .with_context(|| format!("Failed to look up role {}", self.name))
    }
}

impl ProvisionStep for ExecutionRole {
    type Input = ();
    type Output = String;

    const STEP_NAME: &'static str = "execution role";

    async fn ensure<C: CloudApi>(&self, cloud: &C, _input: ()) -> Result<StepOutcome<String>> {
        if let Some(arn) = self.existing_arn(cloud).await? {
            tracing::info!(role = %self.name, %arn, "Execution role already exists");
            return Ok(StepOutcome::AlreadyExists(arn));
        }

        let trust_policy = Self::trust_policy().to_string();
        let arn = match cloud
            .create_role(&self.name, &trust_policy)
            .await
            .with_context(|| format!("Failed to create role {}", self.name))?
        {
            Creation::Created(arn) => arn,
            Creation::AlreadyExists => {
                let arn = self.existing_arn(cloud).await?.with_context(|| {
                    format!("Role {} was reported as existing but not found", self.name)
                })?;
                tracing::info!(role = %self.name, %arn, "Execution role created concurrently, reusing it");
                return Ok(StepOutcome::AlreadyExists(arn));
            }
        };

        for policy in &self.policies {
            tracing::debug!(role = %self.name, %policy, "Attaching policy");
            cloud
                .attach_role_policy(&self.name, policy)
                .await
                .with_context(|| format!("Failed to attach {} to role {}", policy, self.name))?;
        }

        if !self.propagation_delay.is_zero() {
            tracing::debug!(delay = ?self.propagation_delay, "Waiting for role propagation");
            tokio::time::sleep(self.propagation_delay).await;
        }

        tracing::info!(role = %self.name, %arn, "Execution role created");
        Ok(StepOutcome::Created(arn))
    }
}
