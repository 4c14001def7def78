//! AWS SDK implementation of the management API seam.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_apigateway::types::IntegrationType;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ScalarAttributeType,
    TableStatus,
};
use aws_sdk_lambda::{
    primitives::Blob,
    types::{Environment, FunctionCode, Runtime, State},
};

use super::{
    Creation, FunctionApi, FunctionDefinition, FunctionInfo, GatewayApi, InvokeGrant,
    ResourceState, RoleApi, TableApi, TableDefinition,
};

/// Page size used when listing REST APIs.
const REST_API_PAGE_SIZE: i32 = 500;

/// Clients for every management API, bound to one region.
///
/// Constructed once per run and handed to the provisioner by reference.
#[derive(Debug, Clone)]
pub struct AwsClients {
    iam: aws_sdk_iam::Client,
    dynamodb: aws_sdk_dynamodb::Client,
    lambda: aws_sdk_lambda::Client,
    apigateway: aws_sdk_apigateway::Client,
}

impl AwsClients {
    /// Load credentials from the default provider chain and bind to `region`.
    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::from_sdk_config(&config)
    }

    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self {
            iam: aws_sdk_iam::Client::new(config),
            dynamodb: aws_sdk_dynamodb::Client::new(config),
            lambda: aws_sdk_lambda::Client::new(config),
            apigateway: aws_sdk_apigateway::Client::new(config),
        }
    }
}

fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value).with_context(|| format!("{} is out of range: {}", what, value))
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{} is out of range: {}", what, value))
}

impl RoleApi for AwsClients {
    async fn get_role_arn(&self, role_name: &str) -> Result<Option<String>> {
        tracing::debug!(role_name, "iam:GetRole");
        match self.iam.get_role().role_name(role_name).send().await {
            Ok(output) => Ok(output.role().map(|role| role.arn().to_string())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_entity_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("Failed to look up IAM role {}", role_name)),
        }
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<Creation<String>> {
        tracing::debug!(role_name, "iam:CreateRole");
        let result = self
            .iam
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await;

        match result {
            Ok(output) => {
                let arn = output
                    .role()
                    .map(|role| role.arn().to_string())
                    .context("CreateRole response did not include the role")?;
                Ok(Creation::Created(arn))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_entity_already_exists_exception()) =>
            {
                Ok(Creation::AlreadyExists)
            }
            Err(err) => Err(err).with_context(|| format!("Failed to create IAM role {}", role_name)),
        }
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        tracing::debug!(role_name, policy_arn, "iam:AttachRolePolicy");
        self.iam
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .with_context(|| format!("Failed to attach {} to IAM role {}", policy_arn, role_name))?;
        Ok(())
    }
}

impl TableApi for AwsClients {
    async fn table_state(&self, table_name: &str) -> Result<Option<ResourceState>> {
        tracing::debug!(table_name, "dynamodb:DescribeTable");
        match self.dynamodb.describe_table().table_name(table_name).send().await {
            Ok(output) => {
                let state = match output.table().and_then(|table| table.table_status()) {
                    Some(TableStatus::Active) => ResourceState::Ready,
                    Some(TableStatus::Creating) | Some(TableStatus::Updating) | None => {
                        ResourceState::Pending
                    }
                    Some(_) => ResourceState::Failed,
                };
                Ok(Some(state))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to describe DynamoDB table {}", table_name))
            }
        }
    }

    async fn create_table(&self, definition: &TableDefinition) -> Result<Creation<()>> {
        tracing::debug!(table_name = %definition.name, "dynamodb:CreateTable");
        let key_schema = KeySchemaElement::builder()
            .attribute_name(&definition.partition_key)
            .key_type(KeyType::Hash)
            .build()
            .context("Invalid key schema")?;
        let attribute = AttributeDefinition::builder()
            .attribute_name(&definition.partition_key)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .context("Invalid attribute definition")?;
        let throughput = ProvisionedThroughput::builder()
            .read_capacity_units(to_i64(definition.read_capacity, "Read capacity")?)
            .write_capacity_units(to_i64(definition.write_capacity, "Write capacity")?)
            .build()
            .context("Invalid provisioned throughput")?;

        let result = self
            .dynamodb
            .create_table()
            .table_name(&definition.name)
            .key_schema(key_schema)
            .attribute_definitions(attribute)
            .provisioned_throughput(throughput)
            .send()
            .await;

        match result {
            Ok(_) => Ok(Creation::Created(())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_in_use_exception()) =>
            {
                Ok(Creation::AlreadyExists)
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to create DynamoDB table {}", definition.name)),
        }
    }
}

impl FunctionApi for AwsClients {
    async fn get_function(&self, function_name: &str) -> Result<Option<FunctionInfo>> {
        tracing::debug!(function_name, "lambda:GetFunction");
        match self.lambda.get_function().function_name(function_name).send().await {
            Ok(output) => {
                let configuration = output
                    .configuration()
                    .context("GetFunction response did not include a configuration")?;
                let arn = configuration
                    .function_arn()
                    .context("GetFunction response did not include the function ARN")?;
                Ok(Some(FunctionInfo {
                    arn: arn.to_string(),
                    code_sha256: configuration.code_sha256().map(str::to_string),
                }))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to look up Lambda function {}", function_name))
            }
        }
    }

    async fn function_state(&self, function_name: &str) -> Result<ResourceState> {
        tracing::debug!(function_name, "lambda:GetFunctionConfiguration");
        let output = self
            .lambda
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .with_context(|| format!("Failed to read state of Lambda function {}", function_name))?;

        Ok(match output.state() {
            Some(State::Active) => ResourceState::Ready,
            Some(State::Failed) => ResourceState::Failed,
            _ => ResourceState::Pending,
        })
    }

    async fn create_function(&self, definition: &FunctionDefinition) -> Result<Creation<String>> {
        tracing::debug!(
            function_name = %definition.name,
            runtime = %definition.runtime,
            package_bytes = definition.package.len(),
            "lambda:CreateFunction"
        );

        let code = FunctionCode::builder()
            .zip_file(Blob::new(definition.package.clone()))
            .build();
        let mut environment = Environment::builder();
        for (key, value) in &definition.environment {
            environment = environment.variables(key, value);
        }

        let result = self
            .lambda
            .create_function()
            .function_name(&definition.name)
            .runtime(Runtime::from(definition.runtime.as_str()))
            .role(&definition.role_arn)
            .handler(&definition.handler)
            .code(code)
            .memory_size(to_i32(definition.memory_size, "Memory size")?)
            .timeout(to_i32(definition.timeout_seconds, "Timeout")?)
            .environment(environment.build())
            .send()
            .await;

        match result {
            Ok(output) => {
                let arn = output
                    .function_arn()
                    .context("CreateFunction response did not include the function ARN")?;
                Ok(Creation::Created(arn.to_string()))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_conflict_exception()) =>
            {
                Ok(Creation::AlreadyExists)
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to create Lambda function {}", definition.name)),
        }
    }

    async fn publish_version(&self, function_name: &str) -> Result<String> {
        tracing::debug!(function_name, "lambda:PublishVersion");
        let output = self
            .lambda
            .publish_version()
            .function_name(function_name)
            .send()
            .await
            .with_context(|| format!("Failed to publish a version of {}", function_name))?;

        output
            .version()
            .map(str::to_string)
            .context("PublishVersion response did not include the version")
    }

    async fn put_provisioned_concurrency(
        &self,
        function_name: &str,
        qualifier: &str,
        executions: u32,
    ) -> Result<()> {
        tracing::debug!(function_name, qualifier, executions, "lambda:PutProvisionedConcurrencyConfig");
        self.lambda
            .put_provisioned_concurrency_config()
            .function_name(function_name)
            .qualifier(qualifier)
            .provisioned_concurrent_executions(to_i32(executions, "Provisioned concurrency")?)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to configure provisioned concurrency on {}:{}",
                    function_name, qualifier
                )
            })?;
        Ok(())
    }

    async fn grant_invoke(&self, function_name: &str, grant: &InvokeGrant) -> Result<Creation<()>> {
        tracing::debug!(
            function_name,
            statement_id = %grant.statement_id,
            principal = %grant.principal,
            "lambda:AddPermission"
        );
        let result = self
            .lambda
            .add_permission()
            .function_name(function_name)
            .statement_id(&grant.statement_id)
            .action("lambda:InvokeFunction")
            .principal(&grant.principal)
            .source_arn(&grant.source_arn)
            .send()
            .await;

        match result {
            Ok(_) => Ok(Creation::Created(())),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_conflict_exception()) =>
            {
                Ok(Creation::AlreadyExists)
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to grant {} invoke access", grant.principal)),
        }
    }
}

impl GatewayApi for AwsClients {
    async fn find_rest_api(&self, api_name: &str) -> Result<Option<String>> {
        let mut position: Option<String> = None;
        loop {
            tracing::debug!(api_name, ?position, "apigateway:GetRestApis");
            let output = self
                .apigateway
                .get_rest_apis()
                .limit(REST_API_PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .context("Failed to list REST APIs")?;

            if let Some(api) = output.items().iter().find(|api| api.name() == Some(api_name)) {
                return Ok(api.id().map(str::to_string));
            }

            match output.position() {
                Some(next) if !next.is_empty() => position = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }

    async fn create_rest_api(
        &self,
        api_name: &str,
        minimum_compression_size: u32,
    ) -> Result<Creation<String>> {
        tracing::debug!(api_name, "apigateway:CreateRestApi");
        let result = self
            .apigateway
            .create_rest_api()
            .name(api_name)
            .minimum_compression_size(to_i32(minimum_compression_size, "Minimum compression size")?)
            .send()
            .await;

        match result {
            Ok(output) => {
                let id = output
                    .id()
                    .context("CreateRestApi response did not include the API id")?;
                Ok(Creation::Created(id.to_string()))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conflict_exception()) =>
            {
                Ok(Creation::AlreadyExists)
            }
            Err(err) => Err(err).with_context(|| format!("Failed to create REST API {}", api_name)),
        }
    }

    async fn root_resource_id(&self, api_id: &str) -> Result<String> {
        tracing::debug!(api_id, "apigateway:GetResources");
        let output = self
            .apigateway
            .get_resources()
            .rest_api_id(api_id)
            .send()
            .await
            .with_context(|| format!("Failed to list resources of REST API {}", api_id))?;

        output
            .items()
            .iter()
            .find(|resource| resource.path() == Some("/"))
            .and_then(|resource| resource.id())
            .map(str::to_string)
            .with_context(|| format!("REST API {} has no root resource", api_id))
    }

    async fn create_resource(&self, api_id: &str, parent_id: &str, path_part: &str) -> Result<String> {
        tracing::debug!(api_id, parent_id, path_part, "apigateway:CreateResource");
        let output = self
            .apigateway
            .create_resource()
            .rest_api_id(api_id)
            .parent_id(parent_id)
            .path_part(path_part)
            .send()
            .await
            .with_context(|| format!("Failed to create resource {} on REST API {}", path_part, api_id))?;

        output
            .id()
            .map(str::to_string)
            .context("CreateResource response did not include the resource id")
    }

    async fn put_method(&self, api_id: &str, resource_id: &str, http_method: &str) -> Result<()> {
        tracing::debug!(api_id, resource_id, http_method, "apigateway:PutMethod");
        self.apigateway
            .put_method()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(http_method)
            .authorization_type("NONE")
            .send()
            .await
            .with_context(|| format!("Failed to register {} on resource {}", http_method, resource_id))?;
        Ok(())
    }

    async fn put_proxy_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        http_method: &str,
        uri: &str,
    ) -> Result<()> {
        tracing::debug!(api_id, resource_id, http_method, "apigateway:PutIntegration");
        self.apigateway
            .put_integration()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(http_method)
            .r#type(IntegrationType::AwsProxy)
            .integration_http_method("POST")
            .uri(uri)
            .send()
            .await
            .with_context(|| {
                format!("Failed to integrate {} on resource {}", http_method, resource_id)
            })?;
        Ok(())
    }

    async fn create_deployment(&self, api_id: &str, stage_name: &str) -> Result<()> {
        tracing::debug!(api_id, stage_name, "apigateway:CreateDeployment");
        self.apigateway
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(stage_name)
            .send()
            .await
            .with_context(|| format!("Failed to deploy REST API {} to {}", api_id, stage_name))?;
        Ok(())
    }
}
