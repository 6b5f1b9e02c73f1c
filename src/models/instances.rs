use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

pub type Params = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Provisioning,
    Active,
    Deprovisioning,
    Failed,
}

impl InstanceState {
    pub fn is_transitional(self) -> bool {
        matches!(self, InstanceState::Provisioning | InstanceState::Deprovisioning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Provision,
    Deprovision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

fn default_operation() -> OperationKind {
    OperationKind::Provision
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub params: Params,
    pub stack_id: Option<String>,
    pub state: InstanceState,
    #[serde(default = "default_operation")]
    pub operation: OperationKind,
    pub status_reason: Option<String>,
    #[serde(default)]
    pub bindings: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(request: &ProvisionRequest, stack_id: String) -> Self {
        Self {
            stack_id: Some(stack_id),
            ..Self::pending(request)
        }
    }

    /// An instance recorded before its stack has been requested.
    pub fn pending(request: &ProvisionRequest) -> Self {
        let now = Utc::now();

        Self {
            id: request.instance_id.clone(),
            service_id: request.service_id.clone(),
            plan_id: request.plan_id.clone(),
            params: request.params.clone(),
            stack_id: None,
            state: InstanceState::Provisioning,
            operation: OperationKind::Provision,
            status_reason: None,
            bindings: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches(&self, request: &ProvisionRequest) -> bool {
        self.service_id == request.service_id
            && self.plan_id == request.plan_id
            && self.params == request.params
    }

    pub fn transition(&mut self, state: InstanceState, reason: Option<String>) {
        match state {
            InstanceState::Provisioning => self.operation = OperationKind::Provision,
            InstanceState::Deprovisioning => self.operation = OperationKind::Deprovision,
            InstanceState::Active | InstanceState::Failed => {}
        }
        self.state = state;
        self.status_reason = reason;
        self.updated_at = Utc::now();
    }

    /// The asynchronous operation most recently started on this instance.
    pub fn last_operation(&self) -> OperationKind {
        self.operation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub id: String,
    pub instance_id: String,
    #[serde(default)]
    pub params: Params,
    pub credentials: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ServiceBinding {
    pub fn matches(&self, request: &BindRequest) -> bool {
        self.instance_id == request.instance_id && self.params == request.params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub instance_id: String,
    pub operation: OperationKind,
    pub state: InstanceState,
    /// Set when the request replayed an existing instance.
    pub already_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRequest {
    pub instance_id: String,
    pub binding_id: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindResponse {
    pub binding_id: String,
    pub credentials: BTreeMap<String, String>,
    pub already_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOperation {
    pub operation: OperationKind,
    pub state: OperationState,
    pub description: Option<String>,
}

impl LastOperation {
    pub fn in_progress(operation: OperationKind) -> Self {
        Self {
            operation,
            state: OperationState::InProgress,
            description: None,
        }
    }

    pub fn succeeded(operation: OperationKind) -> Self {
        Self {
            operation,
            state: OperationState::Succeeded,
            description: None,
        }
    }

    pub fn failed(operation: OperationKind, description: impl Into<String>) -> Self {
        Self {
            operation,
            state: OperationState::Failed,
            description: Some(description.into()),
        }
    }
}

#[cfg(test)]
#[path = "instances_tests.rs"]
mod tests;
