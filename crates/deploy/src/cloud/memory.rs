//! In-memory cloud recording every call, for tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use anyhow::Result;

use super::{
    Creation, FunctionApi, FunctionDefinition, FunctionInfo, GatewayApi, InvokeGrant,
    ResourceState, RoleApi, TableApi, TableDefinition,
};

pub(crate) const ACCOUNT_ID: &str = "123456789012";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetRole(String),
    CreateRole(String),
    AttachRolePolicy { role: String, policy: String },
    TableState(String),
    CreateTable(String),
    GetFunction(String),
    FunctionState(String),
    CreateFunction(String),
    PublishVersion(String),
    PutProvisionedConcurrency { qualifier: String, executions: u32 },
    GrantInvoke { function: String, source_arn: String },
    FindRestApi(String),
    CreateRestApi(String),
    RootResource(String),
    CreateResource { parent_id: String, path_part: String },
    PutMethod { resource_id: String, http_method: String },
    PutProxyIntegration { resource_id: String, http_method: String, uri: String },
    CreateDeployment { api_id: String, stage: String },
}

impl Call {
    /// Whether the call only reads state.
    pub(crate) fn is_lookup(&self) -> bool {
        matches!(
            self,
            Call::GetRole(_)
                | Call::TableState(_)
                | Call::GetFunction(_)
                | Call::FunctionState(_)
                | Call::FindRestApi(_)
                | Call::RootResource(_)
        )
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Call::GetRole(_) => "GetRole",
            Call::CreateRole(_) => "CreateRole",
            Call::AttachRolePolicy { .. } => "AttachRolePolicy",
            Call::TableState(_) => "TableState",
            Call::CreateTable(_) => "CreateTable",
            Call::GetFunction(_) => "GetFunction",
            Call::FunctionState(_) => "FunctionState",
            Call::CreateFunction(_) => "CreateFunction",
            Call::PublishVersion(_) => "PublishVersion",
            Call::PutProvisionedConcurrency { .. } => "PutProvisionedConcurrency",
            Call::GrantInvoke { .. } => "GrantInvoke",
            Call::FindRestApi(_) => "FindRestApi",
            Call::CreateRestApi(_) => "CreateRestApi",
            Call::RootResource(_) => "RootResource",
            Call::CreateResource { .. } => "CreateResource",
            Call::PutMethod { .. } => "PutMethod",
            Call::PutProxyIntegration { .. } => "PutProxyIntegration",
            Call::CreateDeployment { .. } => "CreateDeployment",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFunction {
    arn: String,
    code_sha256: String,
    definition: Option<FunctionDefinition>,
    versions: u32,
}

#[derive(Debug, Default)]
struct State {
    roles: BTreeMap<String, String>,
    tables: BTreeMap<String, TableDefinition>,
    functions: BTreeMap<String, StoredFunction>,
    apis: BTreeMap<String, String>,
    next_id: u32,
    /// Polls left before a freshly created table or function turns ready.
    pending_polls: BTreeMap<String, u32>,
    /// Names the next lookup misses, as if created concurrently.
    hidden: BTreeSet<String>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:04}", prefix, self.next_id)
    }

    fn visible(&mut self, name: &str) -> bool {
        !self.hidden.remove(name)
    }
}

/// Cloud whose resources live in process memory.
#[derive(Debug, Default)]
pub(crate) struct MemoryCloud {
    region: String,
    state: Mutex<State>,
    calls: Mutex<Vec<Call>>,
    fail_on: Option<&'static str>,
    polls_until_ready: u32,
    failed_state: bool,
}

impl MemoryCloud {
    pub(crate) fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            ..Default::default()
        }
    }

    /// Fail every call of the given kind, e.g. `"CreateFunction"`.
    pub(crate) fn failing_on(mut self, kind: &'static str) -> Self {
        self.fail_on = Some(kind);
        self
    }

    /// Report new tables and functions as pending for `polls` state checks.
    pub(crate) fn slow_to_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }

    /// Report new tables and functions as failed once they stop pending.
    pub(crate) fn never_ready(mut self) -> Self {
        self.failed_state = true;
        self
    }

    /// Make the next lookup of `name` miss although the resource exists.
    pub(crate) fn hide_once(&self, name: &str) {
        self.state().hidden.insert(name.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Index of the first recorded call of the given kind.
    pub(crate) fn position(&self, kind: &str) -> Option<usize> {
        self.calls().iter().position(|call| call.kind() == kind)
    }

    pub(crate) fn function_definition(&self, name: &str) -> Option<FunctionDefinition> {
        self.state()
            .functions
            .get(name)
            .and_then(|function| function.definition.clone())
    }

    pub(crate) fn table_definition(&self, name: &str) -> Option<TableDefinition> {
        self.state().tables.get(name).cloned()
    }

    /// Seed a function deployed by someone else with the given code digest.
    pub(crate) fn insert_function(&self, name: &str, code_sha256: &str) -> String {
        let arn = self.function_arn(name);
        self.state().functions.insert(
            name.to_string(),
            StoredFunction {
                arn: arn.clone(),
                code_sha256: code_sha256.to_string(),
                definition: None,
                versions: 0,
            },
        );
        arn
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) -> Result<()> {
        let kind = call.kind();
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(kind) {
            anyhow::bail!("injected {} failure", kind);
        }
        Ok(())
    }

    fn function_arn(&self, name: &str) -> String {
        format!("arn:aws:lambda:{}:{}:function:{}", self.region, ACCOUNT_ID, name)
    }

    fn poll(&self, name: &str) -> ResourceState {
        let mut state = self.state();
        match state.pending_polls.get_mut(name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                ResourceState::Pending
            }
            _ if self.failed_state => ResourceState::Failed,
            _ => ResourceState::Ready,
        }
    }
}

impl RoleApi for MemoryCloud {
    async fn get_role_arn(&self, role_name: &str) -> Result<Option<String>> {
        self.record(Call::GetRole(role_name.to_string()))?;
        let mut state = self.state();
        if !state.visible(role_name) {
            return Ok(None);
        }
        Ok(state.roles.get(role_name).cloned())
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<Creation<String>> {
        self.record(Call::CreateRole(role_name.to_string()))?;
        assert!(trust_policy.contains("sts:AssumeRole"));
        let mut state = self.state();
        if state.roles.contains_key(role_name) {
            return Ok(Creation::AlreadyExists);
        }
        let arn = format!("arn:aws:iam::{}:role/{}", ACCOUNT_ID, role_name);
        state.roles.insert(role_name.to_string(), arn.clone());
        Ok(Creation::Created(arn))
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.record(Call::AttachRolePolicy {
            role: role_name.to_string(),
            policy: policy_arn.to_string(),
        })
    }
}

impl TableApi for MemoryCloud {
    async fn table_state(&self, table_name: &str) -> Result<Option<ResourceState>> {
        self.record(Call::TableState(table_name.to_string()))?;
        {
            let mut state = self.state();
            if !state.visible(table_name) || !state.tables.contains_key(table_name) {
                return Ok(None);
            }
        }
        Ok(Some(self.poll(table_name)))
    }

    async fn create_table(&self, definition: &TableDefinition) -> Result<Creation<()>> {
        self.record(Call::CreateTable(definition.name.clone()))?;
        let mut state = self.state();
        if state.tables.contains_key(&definition.name) {
            return Ok(Creation::AlreadyExists);
        }
        state
            .tables
            .insert(definition.name.clone(), definition.clone());
        state
            .pending_polls
            .insert(definition.name.clone(), self.polls_until_ready);
        Ok(Creation::Created(()))
    }
}

impl FunctionApi for MemoryCloud {
    async fn get_function(&self, function_name: &str) -> Result<Option<FunctionInfo>> {
        self.record(Call::GetFunction(function_name.to_string()))?;
        let mut state = self.state();
        if !state.visible(function_name) {
            return Ok(None);
        }
        Ok(state.functions.get(function_name).map(|function| FunctionInfo {
            arn: function.arn.clone(),
            code_sha256: Some(function.code_sha256.clone()),
        }))
    }

    async fn function_state(&self, function_name: &str) -> Result<ResourceState> {
        self.record(Call::FunctionState(function_name.to_string()))?;
        Ok(self.poll(function_name))
    }

    async fn create_function(&self, definition: &FunctionDefinition) -> Result<Creation<String>> {
        self.record(Call::CreateFunction(definition.name.clone()))?;
        let arn = self.function_arn(&definition.name);
        let mut state = self.state();
        if state.functions.contains_key(&definition.name) {
            return Ok(Creation::AlreadyExists);
        }
        state.functions.insert(
            definition.name.clone(),
            StoredFunction {
                arn: arn.clone(),
                code_sha256: crate::handler::package_digest(&definition.package),
                definition: Some(definition.clone()),
                versions: 0,
            },
        );
        state
            .pending_polls
            .insert(definition.name.clone(), self.polls_until_ready);
        Ok(Creation::Created(arn))
    }

    async fn publish_version(&self, function_name: &str) -> Result<String> {
        self.record(Call::PublishVersion(function_name.to_string()))?;
        let mut state = self.state();
        let function = state
            .functions
            .get_mut(function_name)
            .ok_or_else(|| anyhow::anyhow!("no such function {}", function_name))?;
        function.versions += 1;
        Ok(function.versions.to_string())
    }

    async fn put_provisioned_concurrency(
        &self,
        _function_name: &str,
        qualifier: &str,
        executions: u32,
    ) -> Result<()> {
        self.record(Call::PutProvisionedConcurrency {
            qualifier: qualifier.to_string(),
            executions,
        })
    }

    async fn grant_invoke(&self, function_name: &str, grant: &InvokeGrant) -> Result<Creation<()>> {
        self.record(Call::GrantInvoke {
            function: function_name.to_string(),
            source_arn: grant.source_arn.clone(),
        })?;
        assert_eq!(grant.principal, "apigateway.amazonaws.com");
        Ok(Creation::Created(()))
    }
}

impl GatewayApi for MemoryCloud {
    async fn find_rest_api(&self, api_name: &str) -> Result<Option<String>> {
        self.record(Call::FindRestApi(api_name.to_string()))?;
        let mut state = self.state();
        if !state.visible(api_name) {
            return Ok(None);
        }
        Ok(state.apis.get(api_name).cloned())
    }

    async fn create_rest_api(
        &self,
        api_name: &str,
        minimum_compression_size: u32,
    ) -> Result<Creation<String>> {
        self.record(Call::CreateRestApi(api_name.to_string()))?;
        assert_eq!(minimum_compression_size, 1024);
        let mut state = self.state();
        let id = state.next_id("api");
        state.apis.insert(api_name.to_string(), id.clone());
        Ok(Creation::Created(id))
    }

    async fn root_resource_id(&self, api_id: &str) -> Result<String> {
        self.record(Call::RootResource(api_id.to_string()))?;
        Ok(format!("{}-root", api_id))
    }

    async fn create_resource(
        &self,
        _api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<String> {
        self.record(Call::CreateResource {
            parent_id: parent_id.to_string(),
            path_part: path_part.to_string(),
        })?;
        Ok(self.state().next_id("res"))
    }

    async fn put_method(&self, _api_id: &str, resource_id: &str, http_method: &str) -> Result<()> {
        self.record(Call::PutMethod {
            resource_id: resource_id.to_string(),
            http_method: http_method.to_string(),
        })
    }

    async fn put_proxy_integration(
        &self,
        _api_id: &str,
        resource_id: &str,
        http_method: &str,
        uri: &str,
    ) -> Result<()> {
        self.record(Call::PutProxyIntegration {
            resource_id: resource_id.to_string(),
            http_method: http_method.to_string(),
            uri: uri.to_string(),
        })
    }

    async fn create_deployment(&self, api_id: &str, stage_name: &str) -> Result<()> {
        self.record(Call::CreateDeployment {
            api_id: api_id.to_string(),
            stage: stage_name.to_string(),
        })
    }
}
