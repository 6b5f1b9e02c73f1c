#![allow(dead_code)]

use async_trait::async_trait;
use broker::{
    aws::{
        session::{self, RetrySettings, SessionSpec},
        CallerIdentity, ClientFactory, CreateStackRequest, CredentialInputs, Orchestrator,
        ParameterStore, Session, SessionFactory, StackDescription, StackStatus,
    },
    catalog::{BucketDetails, CatalogCache, Synchronizer, TemplateSource},
    errors::{BrokerError, Result},
    models::{BrokerIdentity, ServiceLastUpdate},
    services::{Broker, BrokerSettings},
    storage::{DataStore, MemoryStore},
};
use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use uuid::Uuid;

pub const ACCOUNT_ID: &str = "123456789012";

pub const WIDGET: &str = r#"
AWSTemplateFormatVersion: "2010-09-09"
Metadata:
  AWS::ServiceBroker::Specification:
    Name: widget
    DisplayName: Widget
    LongDescription: Creates a widget
    ServicePlans:
      small:
        DisplayName: Small
        Description: A small widget
        Cost: FREE
        ParameterValues:
          InstanceType: t3.small
Parameters:
  InstanceType:
    Type: String
    Default: t3.micro
  size:
    Type: Number
  VpcId:
    Type: String
    Default: ""
Outputs:
  QueueUrl:
    Value: !Ref Queue
"#;

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

pub fn bucket() -> BucketDetails {
    BucketDetails {
        bucket: "awsservicebroker".into(),
        prefix: "templates/latest/".into(),
        suffix: "-main.yaml".into(),
        region: "us-east-1".into(),
    }
}

#[derive(Default)]
pub struct FakeTemplateSource {
    bucket: Option<BucketDetails>,
    objects: Mutex<BTreeMap<String, (DateTime<Utc>, String)>>,
    pub fail_list: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeTemplateSource {
    pub fn new() -> Self {
        Self {
            bucket: Some(bucket()),
            ..Self::default()
        }
    }

    pub fn put(&self, name: &str, date: DateTime<Utc>, body: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (date, body.to_string()));
    }

    pub fn remove(&self, name: &str) {
        self.objects.lock().unwrap().remove(name);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateSource for FakeTemplateSource {
    fn bucket(&self) -> &BucketDetails {
        self.bucket.as_ref().expect("constructed with new()")
    }

    async fn list_templates(&self) -> Result<Vec<ServiceLastUpdate>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BrokerError::catalog_fetch(anyhow::anyhow!("access denied")));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(name, (date, _))| ServiceLastUpdate {
                name: name.clone(),
                date: *date,
            })
            .collect())
    }

    async fn fetch_template(&self, name: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| BrokerError::catalog_fetch(anyhow::anyhow!("no such key {name}")))
    }
}

/// Stacks are addressable by id or by name, and a name can only be reused
/// once its stack is gone.
#[derive(Default)]
pub struct FakeOrchestrator {
    stacks: Mutex<BTreeMap<String, StackDescription>>,
    pub requests: Mutex<Vec<CreateStackRequest>>,
    pub fail_create: AtomicBool,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

fn stack_key(stacks: &BTreeMap<String, StackDescription>, stack_ref: &str) -> Option<String> {
    stacks
        .keys()
        .find(|id| *id == stack_ref || id.split('/').nth(1) == Some(stack_ref))
        .cloned()
}

impl FakeOrchestrator {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn stack_ids(&self) -> Vec<String> {
        self.stacks.lock().unwrap().keys().cloned().collect()
    }

    pub fn last_request(&self) -> CreateStackRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    pub fn set_status(&self, stack_id: &str, status: &str, reason: Option<&str>) {
        let mut stacks = self.stacks.lock().unwrap();
        let stack = stacks.get_mut(stack_id).unwrap();
        stack.status = StackStatus::from(status);
        stack.status_reason = reason.map(str::to_string);
    }

    pub fn set_outputs(&self, stack_id: &str, outputs: &[(&str, &str)]) {
        let mut stacks = self.stacks.lock().unwrap();
        stacks.get_mut(stack_id).unwrap().outputs = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
    }

    /// Simulates the provider forgetting a deleted stack.
    pub fn forget(&self, stack_id: &str) {
        self.stacks.lock().unwrap().remove(stack_id);
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BrokerError::cloud(anyhow::anyhow!("template validation failed")));
        }
        let mut stacks = self.stacks.lock().unwrap();
        if stack_key(&stacks, &request.stack_name).is_some() {
            return Err(BrokerError::cloud(anyhow::anyhow!(
                "stack [{}] already exists",
                request.stack_name
            )));
        }

        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        let stack_id = format!(
            "arn:aws:cloudformation:us-east-1:{}:stack/{}/{}",
            ACCOUNT_ID, request.stack_name, n
        );
        self.requests.lock().unwrap().push(request.clone());
        stacks.insert(
            stack_id.clone(),
            StackDescription {
                stack_id: stack_id.clone(),
                status: StackStatus::CreateInProgress,
                status_reason: None,
                outputs: BTreeMap::new(),
            },
        );
        Ok(stack_id)
    }

    async fn describe_stack(&self, stack_ref: &str) -> Result<StackDescription> {
        let stacks = self.stacks.lock().unwrap();
        stack_key(&stacks, stack_ref)
            .and_then(|id| stacks.get(&id).cloned())
            .ok_or_else(|| BrokerError::not_found(format!("stack {stack_ref} does not exist")))
    }

    async fn delete_stack(&self, stack_ref: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut stacks = self.stacks.lock().unwrap();
        if let Some(id) = stack_key(&stacks, stack_ref) {
            if let Some(stack) = stacks.get_mut(&id) {
                stack.status = StackStatus::DeleteInProgress;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeParameterStore {
    pub values: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl ParameterStore for FakeParameterStore {
    async fn get_parameters(&self, names: &[String]) -> Result<BTreeMap<String, String>> {
        let values = self.values.lock().unwrap();
        Ok(names
            .iter()
            .filter_map(|name| Some((name.clone(), values.get(name)?.clone())))
            .collect())
    }
}

pub struct FakeIdentity;

#[async_trait]
impl CallerIdentity for FakeIdentity {
    async fn account_id(&self) -> Result<String> {
        Ok(ACCOUNT_ID.to_string())
    }
}

/// Hands out the shared fakes and records the session each client was built for.
pub struct FakeClientFactory {
    pub orchestrator: Arc<FakeOrchestrator>,
    pub source: Arc<FakeTemplateSource>,
    pub parameters: Arc<FakeParameterStore>,
    pub store: Arc<MemoryStore>,
    pub sessions: Mutex<Vec<SessionSpec>>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self {
            orchestrator: Arc::new(FakeOrchestrator::default()),
            source: Arc::new(FakeTemplateSource::new()),
            parameters: Arc::new(FakeParameterStore::default()),
            store: Arc::new(MemoryStore::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn last_session(&self) -> SessionSpec {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }

    fn record(&self, session: &Session) {
        self.sessions.lock().unwrap().push(session.spec().clone());
    }
}

impl ClientFactory for FakeClientFactory {
    fn orchestrator(&self, session: &Session) -> Arc<dyn Orchestrator> {
        self.record(session);
        self.orchestrator.clone()
    }

    fn template_source(&self, session: &Session, _: &BucketDetails) -> Arc<dyn TemplateSource> {
        self.record(session);
        self.source.clone()
    }

    fn parameter_store(&self, session: &Session) -> Arc<dyn ParameterStore> {
        self.record(session);
        self.parameters.clone()
    }

    fn identity(&self, session: &Session) -> Arc<dyn CallerIdentity> {
        self.record(session);
        Arc::new(FakeIdentity)
    }

    fn data_store(&self, session: &Session, _: &str, _: &str) -> Arc<dyn DataStore> {
        self.record(session);
        self.store.clone()
    }
}

/// Resolves sessions with the real priority chain but never loads credentials.
#[derive(Default)]
pub struct FakeSessionFactory;

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn session(
        &self,
        inputs: &CredentialInputs,
        overrides: &HashMap<String, String>,
    ) -> Result<Session> {
        let spec = session::resolve(inputs, overrides)?;
        Ok(Session::unloaded(spec, RetrySettings::default()))
    }
}

pub fn identity() -> BrokerIdentity {
    BrokerIdentity {
        account_id: ACCOUNT_ID.into(),
        broker_id: "awsservicebroker".into(),
        account_uuid: Uuid::parse_str("0f8fad5b-d9cb-469f-a165-70867728950e").unwrap(),
    }
}

pub fn settings(overrides: &[(&str, &str)], prescribe: bool) -> BrokerSettings {
    BrokerSettings {
        credentials: CredentialInputs {
            region: "us-east-1".into(),
            account_id: Some(ACCOUNT_ID.into()),
            ..CredentialInputs::default()
        },
        global_overrides: overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        prescribe_overrides: prescribe,
    }
}

pub struct TestBroker {
    pub broker: Broker,
    pub clients: Arc<FakeClientFactory>,
    pub cache: Arc<CatalogCache>,
    pub synchronizer: Synchronizer,
}

impl TestBroker {
    pub fn orchestrator(&self) -> &FakeOrchestrator {
        &self.clients.orchestrator
    }

    pub fn store(&self) -> &MemoryStore {
        &self.clients.store
    }

    pub fn source(&self) -> &FakeTemplateSource {
        &self.clients.source
    }
}

pub fn test_broker_with(settings: BrokerSettings) -> TestBroker {
    let clients = Arc::new(FakeClientFactory::new());
    let cache = Arc::new(CatalogCache::new(Duration::from_secs(3600)));
    let synchronizer = Synchronizer::new(
        clients.source.clone(),
        clients.store.clone(),
        cache.clone(),
    );
    let broker = Broker::new(
        settings,
        identity(),
        cache.clone(),
        clients.store.clone(),
        Arc::new(FakeSessionFactory),
        clients.clone(),
    );

    TestBroker {
        broker,
        clients,
        cache,
        synchronizer,
    }
}

/// A broker whose catalog holds the widget template.
pub async fn test_broker() -> TestBroker {
    let test = test_broker_with(settings(&[], true));
    test.source().put("widget", day(1), WIDGET);
    test.synchronizer.run_pass().await.unwrap();
    test
}
