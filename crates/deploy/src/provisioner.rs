//! Sequential provisioning of the service's cloud resources.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, Table};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    cloud::CloudApi,
    config::DeploymentConfig,
    steps::{
        ComputeFunction, DataTable, ExecutionRole, FunctionInputs, HttpGateway, ProvisionStep,
        StepOutcome,
    },
    wait::Waiter,
};

/// Which resources this run created, as opposed to reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResources {
    pub role: bool,
    pub table: bool,
    pub function: bool,
    pub api: bool,
}

impl CreatedResources {
    pub fn any(&self) -> bool {
        self.role || self.table || self.function || self.api
    }
}

/// Identifiers of a provisioned service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub service_name: String,
    pub region: String,
    pub stage_name: String,
    pub role_arn: String,
    pub table_name: String,
    pub function_arn: String,
    pub api_id: String,
    /// Set only when the repository was created, pushed and given its workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    pub created: CreatedResources,
    pub provisioned_at: DateTime<Utc>,
}

impl ProvisionResult {
    /// Base URL of the deployed stage.
    pub fn invoke_url(&self) -> Result<Url> {
        let url = format!(
            "https://{}.execute-api.{}.amazonaws.com/{}/",
            self.api_id, self.region, self.stage_name
        );
        Url::parse(&url).with_context(|| format!("Invalid invoke URL {}", url))
    }

    /// Load a result previously written as JSON.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read result from {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse provisioning result as JSON")
    }

    /// Write the result as pretty JSON.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize provisioning result")?;
        std::fs::write(path, content)
            .context(format!("Failed to write result to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Provisioning result saved");
        Ok(())
    }

    pub fn to_table(&self) -> Table {
        fn status(created: bool) -> Cell {
            if created {
                Cell::new("created").fg(Color::Green)
            } else {
                Cell::new("reused").fg(Color::Yellow)
            }
        }

        let mut table = Table::new();
        table.set_header(vec!["Resource", "Identifier", "Status"]);
        table.add_row(vec![
            Cell::new("Execution role"),
            Cell::new(&self.role_arn),
            status(self.created.role),
        ]);
        table.add_row(vec![
            Cell::new("Data table"),
            Cell::new(&self.table_name),
            status(self.created.table),
        ]);
        table.add_row(vec![
            Cell::new("Function"),
            Cell::new(&self.function_arn),
            status(self.created.function),
        ]);
        table.add_row(vec![
            Cell::new("REST API"),
            Cell::new(&self.api_id),
            status(self.created.api),
        ]);
        if let Ok(url) = self.invoke_url() {
            table.add_row(vec![Cell::new("Invoke URL"), Cell::new(url), Cell::new("")]);
        }
        table.add_row(vec![
            Cell::new("Repository"),
            Cell::new(self.repository_url.as_deref().unwrap_or("-")),
            Cell::new(""),
        ]);
        table
    }
}

/// Creates the four resources in dependency order: role and table, then the
/// function bound to both, then the gateway in front of the function.
pub struct Provisioner<'a, C> {
    config: &'a DeploymentConfig,
    cloud: &'a C,
    waiter: Waiter,
}

impl<'a, C: CloudApi> Provisioner<'a, C> {
    pub fn new(config: &'a DeploymentConfig, cloud: &'a C) -> Self {
        Self {
            config,
            cloud,
            waiter: Waiter::default(),
        }
    }

    /// Poll table and function readiness with the given waiter.
    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Run every step. The first failure aborts the remaining steps and
    /// leaves already created resources in place.
    pub async fn provision(&self) -> Result<ProvisionResult> {
        let config = self.config;
        tracing::info!(
            service_name = %config.service_name,
            region = %config.region,
            on_existing = %config.on_existing,
            "Starting provisioning"
        );

        let mut created = CreatedResources::default();

        let role = self
            .run_step(&ExecutionRole::from_config(config), ())
            .await?;
        created.role = role.was_created();
        let role_arn = role.resolve(config.on_existing, ExecutionRole::STEP_NAME)?;

        let table = self
            .run_step(&DataTable::from_config(config, self.waiter), ())
            .await?;
        created.table = table.was_created();
        let table_name = table.resolve(config.on_existing, DataTable::STEP_NAME)?;

        let function = self
            .run_step(
                &ComputeFunction::from_config(config, self.waiter),
                FunctionInputs {
                    role_arn: role_arn.clone(),
                    table_name: table_name.clone(),
                },
            )
            .await?;
        created.function = function.was_created();
        let function_arn = function.resolve(config.on_existing, ComputeFunction::STEP_NAME)?;

        let api = self
            .run_step(&HttpGateway::from_config(config), function_arn.clone())
            .await?;
        created.api = api.was_created();
        let api_id = api.resolve(config.on_existing, HttpGateway::STEP_NAME)?;

        let result = ProvisionResult {
            service_name: config.service_name.clone(),
            region: config.region.clone(),
            stage_name: config.stage_name.clone(),
            role_arn,
            table_name,
            function_arn,
            api_id,
            repository_url: None,
            created,
            provisioned_at: Utc::now(),
        };
        tracing::info!(
            service_name = %result.service_name,
            api_id = %result.api_id,
            created_any = result.created.any(),
            "Provisioning complete"
        );
        Ok(result)
    }

    async fn run_step<S: ProvisionStep>(
        &self,
        step: &S,
        input: S::Input,
    ) -> Result<StepOutcome<S::Output>> {
        tracing::info!(step = S::STEP_NAME, "Ensuring resource");
        let outcome = step
            .ensure(self.cloud, input)
            .await
            .with_context(|| format!("Failed to ensure {}", S::STEP_NAME))?;
        tracing::info!(step = S::STEP_NAME, created = outcome.was_created(), "Resource ready");
        Ok(outcome)
    }
}
