//! Provisioning steps.
//!
//! Each step ensures one named resource exists and returns its identifier.
//! Steps look their resource up first and only create it when the lookup
//! misses, so re-running a deployment only reads state.

use std::future::Future;

use anyhow::Result;

use crate::{cloud::CloudApi, config::ExistingResourcePolicy};

mod function;
mod gateway;
mod role;
mod table;

pub use function::{ComputeFunction, FunctionInputs};
pub use gateway::HttpGateway;
pub use role::ExecutionRole;
pub use table::DataTable;

/// Successful outcome of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// The resource was created by this run.
    Created(T),
    /// The resource was already present and is reused as is.
    AlreadyExists(T),
}

impl<T> StepOutcome<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, StepOutcome::Created(_))
    }

    pub fn value(&self) -> &T {
        match self {
            StepOutcome::Created(value) | StepOutcome::AlreadyExists(value) => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StepOutcome::Created(value) | StepOutcome::AlreadyExists(value) => value,
        }
    }

    /// Apply the reuse policy, turning a reused resource into an error under
    /// [`ExistingResourcePolicy::Fail`].
    pub fn resolve(self, policy: ExistingResourcePolicy, step: &str) -> Result<T> {
        match (self, policy) {
            (StepOutcome::AlreadyExists(_), ExistingResourcePolicy::Fail) => {
                anyhow::bail!("{} already exists and reuse is disabled", step)
            }
            (outcome, _) => Ok(outcome.into_value()),
        }
    }
}

/// One resource of the deployment.
///
/// `Input` carries the identifiers produced by the steps it depends on, so a
/// step cannot run before them.
pub trait ProvisionStep: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// The name of this step for logging/identification.
    const STEP_NAME: &'static str;

    /// Make sure the resource exists, creating it when needed.
    fn ensure<C: CloudApi>(
        &self,
        cloud: &C,
        input: Self::Input,
    ) -> impl Future<Output = Result<StepOutcome<Self::Output>>> + Send;
}
