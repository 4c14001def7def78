//! Data table backing the item collection.

use anyhow::{Context, Result};

use super::{ProvisionStep, StepOutcome};
use crate::{
    cloud::{CloudApi, Creation, ResourceState, TableDefinition},
    config::DeploymentConfig,
    wait::Waiter,
};

/// Partition key every record is stored under.
pub const PARTITION_KEY: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTable {
    pub definition: TableDefinition,
    pub waiter: Waiter,
}

impl DataTable {
    pub fn from_config(config: &DeploymentConfig, waiter: Waiter) -> Self {
        Self {
            definition: TableDefinition {
                name: config.table_name(),
                partition_key: PARTITION_KEY.to_string(),
                read_capacity: config.table_read_capacity,
                write_capacity: config.table_write_capacity,
            },
            waiter,
        }
    }

    async fn wait_active<C: CloudApi>(&self, cloud: &C) -> Result<()> {
        let name = self.definition.name.as_str();
        self.waiter
            .until_ready(name, move || async move {
                cloud
                    .table_state(name)
                    .await
                    .with_context(|| format!("Failed to describe table {}", name))?
                    .with_context(|| format!("Table {} disappeared while waiting", name))
            })
            .await
    }
}

impl ProvisionStep for DataTable {
    type Input = ();
    type Output = String;

    const STEP_NAME: &'static str = "data table";

    async fn ensure<C: CloudApi>(&self, cloud: &C, _input: ()) -> Result<StepOutcome<String>> {
        let name = &self.definition.name;

        let existing = cloud
            .table_state(name)
            .await
            .with_context(|| format!("Failed to describe table {}", name))?;
        if let Some(state) = existing {
            // The schema of a reused table is not checked.
            tracing::info!(table = %name, ?state, "Table already exists");
            if state != ResourceState::Ready {
                self.wait_active(cloud).await?;
            }
            return Ok(StepOutcome::AlreadyExists(name.clone()));
        }

        let creation = cloud
            .create_table(&self.definition)
            .await
            .with_context(|| format!("Failed to create table {}", name))?;

        tracing::info!(table = %name, "Waiting for table to become active");
        self.wait_active(cloud).await?;

        match creation {
            Creation::Created(()) => {
                tracing::info!(table = %name, "Table created");
                Ok(StepOutcome::Created(name.clone()))
            }
            Creation::AlreadyExists => {
                tracing::info!(table = %name, "Table created concurrently, reusing it");
                Ok(StepOutcome::AlreadyExists(name.clone()))
            }
        }
    }
}
