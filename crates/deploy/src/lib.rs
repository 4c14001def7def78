//! crudforge-deploy - Provisioning library for serverless CRUD services.
//!
//! This crate provisions an execution role, a data table, a compute function
//! and a REST API for a service, and can publish the service sources to a
//! hosted repository with a CI workflow redeploying the function.

pub mod cloud;
pub use cloud::{AwsClients, CloudApi, Creation, ResourceState};

mod config;
pub use config::{
    CONFIG_FILENAME, DeploymentConfig, ENV_PREFIX, ExistingResourcePolicy, PublishConfig,
    PublishFailurePolicy, RepoToken,
};

mod deployer;
pub use deployer::Deployment;

pub mod handler;
pub use handler::HandlerPackage;

mod provisioner;
pub use provisioner::{CreatedResources, ProvisionResult, Provisioner};

pub mod publish;
pub use publish::{PublishError, Publisher};

mod smoke;
pub use smoke::{SmokeCheck, SmokeReport, SmokeRunner};

pub mod steps;
pub use steps::{ProvisionStep, StepOutcome};

mod template;

mod wait;
pub use wait::Waiter;

#[cfg(test)]
mod test_http;
