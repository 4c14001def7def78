//! Management API seam.
//!
//! The provisioning steps only talk to the cloud through the traits in this
//! module. [`AwsClients`] implements them on top of the AWS SDK; tests use an
//! in-memory implementation that records every call.

use std::{collections::BTreeMap, future::Future};

use anyhow::Result;

mod aws;
#[cfg(test)]
pub(crate) mod memory;

pub use aws::AwsClients;

/// Outcome of a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation<T> {
    /// The resource was created by this call.
    Created(T),
    /// The platform rejected the call because the resource already exists.
    AlreadyExists,
}

/// Readiness of a resource that becomes available asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Pending,
    Ready,
    Failed,
}

/// Table to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    /// Name of the single string partition key.
    pub partition_key: String,
    pub read_capacity: u64,
    pub write_capacity: u64,
}

/// Function to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDefinition {
    pub name: String,
    pub runtime: String,
    pub role_arn: String,
    /// Handler entrypoint, `module.function`.
    pub handler: String,
    /// Zip archive holding the handler code.
    pub package: Vec<u8>,
    pub memory_size: u32,
    pub timeout_seconds: u32,
    pub environment: BTreeMap<String, String>,
}

/// Existing function as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub arn: String,
    /// Base64 SHA-256 digest of the deployed package.
    pub code_sha256: Option<String>,
}

/// Resource policy statement letting another service invoke a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeGrant {
    pub statement_id: String,
    pub principal: String,
    pub source_arn: String,
}

/// Identity and access management.
pub trait RoleApi: Send + Sync {
    /// Look up a role's ARN, `None` when the role does not exist.
    fn get_role_arn(&self, role_name: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Create a role with the given trust policy document, returning its ARN.
    fn create_role(
        &self,
        role_name: &str,
        trust_policy: &str,
    ) -> impl Future<Output = Result<Creation<String>>> + Send;

    /// Attach a managed policy to a role.
    fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Key-value tables.
pub trait TableApi: Send + Sync {
    /// Readiness of a table, `None` when the table does not exist.
    fn table_state(
        &self,
        table_name: &str,
    ) -> impl Future<Output = Result<Option<ResourceState>>> + Send;

    /// Start creating a table. The table is not usable until it is ready.
    fn create_table(
        &self,
        definition: &TableDefinition,
    ) -> impl Future<Output = Result<Creation<()>>> + Send;
}

/// Compute functions.
pub trait FunctionApi: Send + Sync {
    /// Look up a function, `None` when it does not exist.
    fn get_function(
        &self,
        function_name: &str,
    ) -> impl Future<Output = Result<Option<FunctionInfo>>> + Send;

    /// Readiness of an existing function.
    fn function_state(
        &self,
        function_name: &str,
    ) -> impl Future<Output = Result<ResourceState>> + Send;

    /// Create a function, returning its ARN.
    fn create_function(
        &self,
        definition: &FunctionDefinition,
    ) -> impl Future<Output = Result<Creation<String>>> + Send;

    /// Publish the current code and configuration as a version.
    fn publish_version(&self, function_name: &str) -> impl Future<Output = Result<String>> + Send;

    /// Keep `executions` instances of a version initialized.
    fn put_provisioned_concurrency(
        &self,
        function_name: &str,
        qualifier: &str,
        executions: u32,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Add a statement to the function's resource policy.
    fn grant_invoke(
        &self,
        function_name: &str,
        grant: &InvokeGrant,
    ) -> impl Future<Output = Result<Creation<()>>> + Send;
}

/// REST API gateways.
pub trait GatewayApi: Send + Sync {
    /// Find a REST API id by name.
    fn find_rest_api(&self, api_name: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Create a REST API, returning its id.
    fn create_rest_api(
        &self,
        api_name: &str,
        minimum_compression_size: u32,
    ) -> impl Future<Output = Result<Creation<String>>> + Send;

    /// Id of the API's `/` resource.
    fn root_resource_id(&self, api_id: &str) -> impl Future<Output = Result<String>> + Send;

    /// Create a child resource, returning its id.
    fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Register an unauthenticated method on a resource.
    fn put_method(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Forward a method to a function through an `AWS_PROXY` integration.
    fn put_proxy_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
        uri: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deploy the API's current configuration to a stage.
    fn create_deployment(
        &self,
        api_id: &str,
        stage_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Every management API the provisioner needs.
pub trait CloudApi: RoleApi + TableApi + FunctionApi + GatewayApi {}

impl<T> CloudApi for T where T: RoleApi + TableApi + FunctionApi + GatewayApi {}
