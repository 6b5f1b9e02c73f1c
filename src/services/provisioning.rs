use crate::{
    aws::{
        stack::{stack_name, StackOutcome},
        ClientFactory, CreateStackRequest, CredentialInputs, Orchestrator, Session, SessionFactory,
        StackDescription,
    },
    catalog::CatalogCache,
    config::Config,
    errors::{BrokerError, Result},
    models::{
        BindRequest, BindResponse, BrokerIdentity, InstanceState, LastOperation, OperationKind,
        Params, PlanParameter, ProvisionRequest, ProvisionResponse, ServiceBinding,
        ServiceDefinition, ServiceInstance,
    },
    state::{BrokerState, OperationKey},
    storage::DataStore,
    utils::params::OverridePolicy,
};
use chrono::Utc;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{info, warn};

const SSM_OUTPUT_PREFIX: &str = "ssm:";

/// Broker-wide inputs every session and stack derivation starts from.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub credentials: CredentialInputs,
    pub global_overrides: HashMap<String, String>,
    pub prescribe_overrides: bool,
}

impl BrokerSettings {
    pub fn from_config(config: &Config, identity: &BrokerIdentity) -> Self {
        Self {
            credentials: config.credential_inputs(Some(&identity.account_id)),
            global_overrides: config.global_overrides.clone(),
            prescribe_overrides: config.prescribe_overrides,
        }
    }
}

/// Drives service instances and bindings through their lifecycle.
pub struct Broker {
    settings: BrokerSettings,
    identity: BrokerIdentity,
    cache: Arc<CatalogCache>,
    state: BrokerState,
    store: Arc<dyn DataStore>,
    sessions: Arc<dyn SessionFactory>,
    clients: Arc<dyn ClientFactory>,
}

impl Broker {
    pub fn new(
        settings: BrokerSettings,
        identity: BrokerIdentity,
        cache: Arc<CatalogCache>,
        store: Arc<dyn DataStore>,
        sessions: Arc<dyn SessionFactory>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            settings,
            identity,
            cache,
            state: BrokerState::new(),
            store,
            sessions,
            clients,
        }
    }

    pub fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    fn policy(&self) -> OverridePolicy<'_> {
        OverridePolicy::new(
            &self.settings.global_overrides,
            self.settings.prescribe_overrides,
        )
    }

    /// Definitions currently advertised, with broker-managed parameters hidden.
    pub fn catalog(&self) -> Vec<ServiceDefinition> {
        let policy = self.policy();
        self.cache
            .listed_definitions()
            .iter()
            .map(|definition| definition.without_parameters(|name| policy.is_hidden(name)))
            .collect()
    }

    /// Parameters a caller may set when provisioning `plan_id`.
    pub async fn plan_parameters(
        &self,
        service_id: &str,
        plan_id: &str,
    ) -> Result<Vec<PlanParameter>> {
        let definition = self.definition(service_id).await?;
        let plan = definition.plan(plan_id).ok_or_else(|| {
            BrokerError::not_found(format!("plan '{}' of service '{}'", plan_id, service_id))
        })?;
        let policy = self.policy();

        Ok(definition
            .open_parameters(plan, |name| policy.is_hidden(name))
            .cloned()
            .collect())
    }

    /// Resolves a definition through the catalog cache, then durable storage.
    pub async fn definition(&self, service_id: &str) -> Result<Arc<ServiceDefinition>> {
        if let Some(definition) = self.cache.metadata.get(service_id) {
            return Ok(definition);
        }

        match self.store.get_service_definition(service_id).await {
            Ok(definition) => Ok(Arc::new(definition)),
            Err(err) if err.is_not_found() => Err(BrokerError::not_found(format!(
                "service '{}'",
                service_id
            ))),
            Err(err) => Err(err),
        }
    }

    async fn load_instance(&self, instance_id: &str) -> Result<ServiceInstance> {
        if let Some(instance) = self.state.instance(instance_id) {
            return Ok(instance);
        }

        let instance = self.store.get_service_instance(instance_id).await?;
        self.state.put_instance(instance.clone());
        Ok(instance)
    }

    async fn find_instance(&self, instance_id: &str) -> Result<Option<ServiceInstance>> {
        match self.load_instance(instance_id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn save_instance(&self, instance: ServiceInstance) -> Result<()> {
        self.store.put_service_instance(&instance).await?;
        self.state.put_instance(instance);
        Ok(())
    }

    /// Drops a record whose stack was never created.
    async fn discard_instance(&self, instance_id: &str) {
        match self.store.delete_service_instance(instance_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!("Failed to discard instance {}: {}", instance_id, err),
        }
        self.state.remove_instance(instance_id);
    }

    /// The recorded stack id, or the deterministic stack name when the id
    /// was never recorded. The orchestrator accepts either.
    fn stack_ref(&self, instance: &ServiceInstance) -> String {
        instance.stack_id.clone().unwrap_or_else(|| {
            stack_name(
                &self.identity.stack_prefix(),
                &instance.service_id,
                &instance.id,
            )
        })
    }

    async fn session_for(&self, params: &Params) -> Result<Session> {
        let overrides = self.policy().session_overrides(params);
        self.sessions
            .session(&self.settings.credentials, &overrides)
            .await
    }

    async fn orchestrator_for(&self, instance: &ServiceInstance) -> Result<Arc<dyn Orchestrator>> {
        let session = self.session_for(&instance.params).await?;
        Ok(self.clients.orchestrator(&session))
    }

    #[tracing::instrument(skip(self, request), fields(instance_id = %request.instance_id))]
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionResponse> {
        let _guard = self
            .state
            .begin(&[OperationKey::Instance(&request.instance_id)])?;

        if let Some(existing) = self.find_instance(&request.instance_id).await? {
            if !existing.matches(&request) {
                return Err(BrokerError::conflict(format!(
                    "instance '{}' already exists with different parameters",
                    request.instance_id
                )));
            }
            return Ok(ProvisionResponse {
                instance_id: existing.id.clone(),
                operation: existing.last_operation(),
                state: existing.state,
                already_exists: true,
            });
        }

        let definition = self.definition(&request.service_id).await?;
        let plan = definition.plan(&request.plan_id).ok_or_else(|| {
            BrokerError::not_found(format!(
                "plan '{}' of service '{}'",
                request.plan_id, request.service_id
            ))
        })?;
        let parameters = self
            .policy()
            .stack_parameters(&definition, plan, &request.params)?;

        let session = self.session_for(&request.params).await?;
        let orchestrator = self.clients.orchestrator(&session);

        let mut instance = ServiceInstance::pending(&request);
        self.save_instance(instance.clone()).await?;

        let created = orchestrator
            .create_stack(&CreateStackRequest {
                stack_name: stack_name(
                    &self.identity.stack_prefix(),
                    &definition.id,
                    &request.instance_id,
                ),
                template_url: definition.template.url(),
                parameters,
            })
            .await;
        match created {
            Ok(stack_id) => instance.stack_id = Some(stack_id),
            Err(err) => {
                self.discard_instance(&instance.id).await;
                return Err(err);
            }
        }

        // the pending record still locates the stack by name
        if let Err(err) = self.save_instance(instance.clone()).await {
            warn!(
                "Stack {:?} was created but could not be recorded on instance {}: {}",
                instance.stack_id, instance.id, err
            );
        }

        info!("Provisioning {} from {}/{}", instance.id, definition.id, plan.id);
        Ok(ProvisionResponse {
            instance_id: instance.id,
            operation: OperationKind::Provision,
            state: InstanceState::Provisioning,
            already_exists: false,
        })
    }

    /// Advances the instance state machine from the current stack status.
    #[tracing::instrument(skip(self))]
    pub async fn last_operation(&self, instance_id: &str) -> Result<LastOperation> {
        let _guard = self.state.begin(&[OperationKey::Instance(instance_id)])?;
        let mut instance = self.load_instance(instance_id).await?;
        let operation = instance.last_operation();

        match instance.state {
            InstanceState::Active => return Ok(LastOperation::succeeded(operation)),
            InstanceState::Failed => {
                return Ok(LastOperation::failed(
                    operation,
                    failure_description(&instance),
                ))
            }
            InstanceState::Provisioning | InstanceState::Deprovisioning => {}
        }

        let stack_ref = self.stack_ref(&instance);
        let orchestrator = self.orchestrator_for(&instance).await?;
        let described = orchestrator.describe_stack(&stack_ref).await;
        let description = match described {
            Ok(description) => description,
            Err(err) if err.is_not_found() && operation == OperationKind::Deprovision => {
                StackDescription {
                    stack_id: stack_ref,
                    status: "DELETE_COMPLETE".into(),
                    status_reason: None,
                    outputs: BTreeMap::new(),
                }
            }
            Err(err) if err.is_not_found() && instance.stack_id.is_none() => StackDescription {
                stack_id: stack_ref,
                status: "CREATE_FAILED".into(),
                status_reason: Some("stack was never created".into()),
                outputs: BTreeMap::new(),
            },
            Err(err) => return Err(err),
        };

        let recovered = instance.stack_id.is_none() && operation == OperationKind::Provision;
        if recovered {
            instance.stack_id = Some(description.stack_id.clone());
        }

        match (description.status.outcome(operation), operation) {
            (StackOutcome::InProgress, _) => {
                if recovered {
                    self.save_instance(instance).await?;
                }
                Ok(LastOperation::in_progress(operation))
            }
            (StackOutcome::Succeeded, OperationKind::Provision) => {
                instance.transition(InstanceState::Active, None);
                self.save_instance(instance).await?;
                info!("Instance {} is active", instance_id);
                Ok(LastOperation::succeeded(operation))
            }
            (StackOutcome::Succeeded, OperationKind::Deprovision) => {
                match self.store.delete_service_instance(instance_id).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
                self.state.remove_instance(instance_id);
                info!("Instance {} is deprovisioned", instance_id);
                Ok(LastOperation::succeeded(operation))
            }
            (StackOutcome::Failed, _) => {
                let reason = description
                    .status_reason
                    .unwrap_or_else(|| description.status.as_str().to_string());
                instance.transition(
                    InstanceState::Failed,
                    Some(format!("{}: {}", description.status.as_str(), reason)),
                );
                let failure = failure_description(&instance);
                self.save_instance(instance).await?;
                warn!("Instance {} failed: {}", instance_id, failure);
                Ok(LastOperation::failed(operation, failure))
            }
        }
    }

    /// Starts stack deletion. Rejected while the instance is still being
    /// created or has live bindings.
    #[tracing::instrument(skip(self))]
    pub async fn deprovision(&self, instance_id: &str) -> Result<LastOperation> {
        let _guard = self.state.begin(&[OperationKey::Instance(instance_id)])?;
        let mut instance = self.load_instance(instance_id).await?;

        match instance.state {
            InstanceState::Provisioning => {
                return Err(BrokerError::conflict(format!(
                    "instance '{}' is still provisioning",
                    instance_id
                )))
            }
            InstanceState::Deprovisioning => {
                return Ok(LastOperation::in_progress(OperationKind::Deprovision))
            }
            InstanceState::Active | InstanceState::Failed => {}
        }

        if !instance.bindings.is_empty() {
            return Err(BrokerError::dependency_violation(format!(
                "instance '{}' has {} live binding(s)",
                instance_id,
                instance.bindings.len()
            )));
        }

        let orchestrator = self.orchestrator_for(&instance).await?;
        match orchestrator.delete_stack(&self.stack_ref(&instance)).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        instance.transition(InstanceState::Deprovisioning, None);
        self.save_instance(instance).await?;

        info!("Deprovisioning {}", instance_id);
        Ok(LastOperation::in_progress(OperationKind::Deprovision))
    }

    #[tracing::instrument(
        skip(self, request),
        fields(instance_id = %request.instance_id, binding_id = %request.binding_id)
    )]
    pub async fn bind(&self, request: BindRequest) -> Result<BindResponse> {
        let _guard = self.state.begin(&[
            OperationKey::Instance(&request.instance_id),
            OperationKey::Binding(&request.binding_id),
        ])?;
        let mut instance = self.load_instance(&request.instance_id).await?;

        match self.store.get_service_binding(&request.binding_id).await {
            Ok(existing) if existing.matches(&request) => {
                return Ok(BindResponse {
                    binding_id: existing.id,
                    credentials: existing.credentials,
                    already_exists: true,
                })
            }
            Ok(_) => {
                return Err(BrokerError::conflict(format!(
                    "binding '{}' already exists with different parameters",
                    request.binding_id
                )))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        if instance.state != InstanceState::Active {
            return Err(BrokerError::conflict(format!(
                "instance '{}' is not active",
                request.instance_id
            )));
        }
        let definition = self.definition(&instance.service_id).await?;
        if !definition.bindable {
            return Err(BrokerError::invalid_parameters(format!(
                "service '{}' is not bindable",
                definition.id
            )));
        }
        let session = self.session_for(&instance.params).await?;
        let description = self
            .clients
            .orchestrator(&session)
            .describe_stack(&self.stack_ref(&instance))
            .await?;
        let credentials = self.resolve_outputs(&session, description.outputs).await?;

        let binding = ServiceBinding {
            id: request.binding_id.clone(),
            instance_id: request.instance_id.clone(),
            params: request.params,
            credentials,
            created_at: Utc::now(),
        };
        // a binding record never exists unless its instance lists it
        instance.bindings.insert(binding.id.clone());
        instance.updated_at = Utc::now();
        self.save_instance(instance.clone()).await?;

        if let Err(err) = self.store.put_service_binding(&binding).await {
            instance.bindings.remove(&binding.id);
            if let Err(rollback) = self.save_instance(instance).await {
                warn!(
                    "Instance {} still lists unwritten binding {}: {}",
                    binding.instance_id, binding.id, rollback
                );
            }
            return Err(err);
        }

        info!("Bound {} to {}", binding.id, binding.instance_id);
        Ok(BindResponse {
            binding_id: binding.id,
            credentials: binding.credentials,
            already_exists: false,
        })
    }

    /// Removes the binding record. The instance's infrastructure is untouched.
    #[tracing::instrument(skip(self))]
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<()> {
        let _guard = self.state.begin(&[
            OperationKey::Instance(instance_id),
            OperationKey::Binding(binding_id),
        ])?;

        let instance = self.find_instance(instance_id).await?;
        let listed = instance
            .as_ref()
            .is_some_and(|instance| instance.bindings.contains(binding_id));

        match self.store.get_service_binding(binding_id).await {
            Ok(binding) if binding.instance_id == instance_id => {
                match self.store.delete_service_binding(binding_id).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }
            // a record lost by an earlier partial write; still clear the listing
            Err(err) if err.is_not_found() && listed => {}
            Ok(_) => {
                return Err(BrokerError::not_found(format!(
                    "binding '{}' of instance '{}'",
                    binding_id, instance_id
                )))
            }
            Err(err) => return Err(err),
        }

        if let Some(mut instance) = instance {
            if instance.bindings.remove(binding_id) {
                instance.updated_at = Utc::now();
                self.save_instance(instance).await?;
            }
        }

        info!("Unbound {} from {}", binding_id, instance_id);
        Ok(())
    }

    /// Replaces `ssm:<name>` output values with the named parameter.
    async fn resolve_outputs(
        &self,
        session: &Session,
        mut outputs: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let names: Vec<String> = outputs
            .values()
            .filter_map(|value| value.strip_prefix(SSM_OUTPUT_PREFIX))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if names.is_empty() {
            return Ok(outputs);
        }

        let resolved = self
            .clients
            .parameter_store(session)
            .get_parameters(&names)
            .await?;

        for value in outputs.values_mut() {
            let Some(name) = value.strip_prefix(SSM_OUTPUT_PREFIX) else {
                continue;
            };
            let parameter = resolved
                .get(name)
                .ok_or_else(|| BrokerError::not_found(format!("parameter '{}'", name)))?;
            *value = parameter.clone();
        }

        Ok(outputs)
    }
}

fn failure_description(instance: &ServiceInstance) -> String {
    BrokerError::provisioning_failed(
        instance
            .status_reason
            .clone()
            .unwrap_or_else(|| format!("instance '{}' failed", instance.id)),
    )
    .to_string()
}

#[cfg(test)]
#[path = "provisioning_tests.rs"]
mod tests;
