use crate::{
    errors::Result,
    models::{ServiceBinding, ServiceDefinition, ServiceInstance},
};
use async_trait::async_trait;

pub mod dynamodb;
pub mod memory;

pub use dynamodb::DynamoDbStore;
pub use memory::MemoryStore;

/// Durable state every backend must provide.
///
/// Writes are atomic per key. A `get_*` on a missing key returns
/// `BrokerError::NotFound`, never an empty success.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn put_service_definition(&self, definition: &ServiceDefinition) -> Result<()>;
    async fn get_service_definition(&self, service_id: &str) -> Result<ServiceDefinition>;

    async fn get_param(&self, name: &str) -> Result<String>;
    async fn put_param(&self, name: &str, value: &str) -> Result<()>;

    async fn get_service_instance(&self, instance_id: &str) -> Result<ServiceInstance>;
    async fn put_service_instance(&self, instance: &ServiceInstance) -> Result<()>;
    async fn delete_service_instance(&self, instance_id: &str) -> Result<()>;

    async fn get_service_binding(&self, binding_id: &str) -> Result<ServiceBinding>;
    async fn put_service_binding(&self, binding: &ServiceBinding) -> Result<()>;
    async fn delete_service_binding(&self, binding_id: &str) -> Result<()>;
}

/// Kinds of record a backend keeps, used to namespace keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Definition,
    Param,
    Instance,
    Binding,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Definition => "definition",
            RecordKind::Param => "param",
            RecordKind::Instance => "instance",
            RecordKind::Binding => "binding",
        }
    }
}
