use crate::{
    errors::{BrokerError, Result},
    models::{ServiceBinding, ServiceDefinition, ServiceInstance},
    storage::{DataStore, RecordKind},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{types::AttributeValue, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

const ATTR_ID: &str = "id";
const ATTR_KIND: &str = "kind";
const ATTR_VALUE: &str = "value";

/// Table-storage backend. One item per record, keyed by
/// `<namespace>#<kind>#<key>` with the record serialized as JSON.
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    table_name: String,
    namespace: String,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("table_name", &self.table_name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl DynamoDbStore {
    pub fn new(client: Client, table_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            namespace: namespace.into(),
        }
    }

    fn item_id(&self, kind: RecordKind, key: &str) -> String {
        format!("{}#{}#{}", self.namespace, kind.as_str(), key)
    }

    fn key(&self, kind: RecordKind, key: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(
            ATTR_ID.to_string(),
            AttributeValue::S(self.item_id(kind, key)),
        )])
    }

    async fn get<T: DeserializeOwned>(&self, kind: RecordKind, key: &str) -> Result<T> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(kind, key)))
            .consistent_read(true)
            .send()
            .await
            .context(format!("Failed to get {} '{}'", kind.as_str(), key))
            .map_err(BrokerError::storage)?;

        let item = output
            .item()
            .ok_or_else(|| BrokerError::not_found(format!("{} '{}'", kind.as_str(), key)))?;
        decode_item(item, kind, key)
    }

    async fn put<T: Serialize + Sync>(&self, kind: RecordKind, key: &str, value: &T) -> Result<()> {
        let item = encode_item(self.item_id(kind, key), kind, value)?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .context(format!("Failed to put {} '{}'", kind.as_str(), key))
            .map_err(BrokerError::storage)?;

        Ok(())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<()> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(kind, key)))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await
            .context(format!("Failed to delete {} '{}'", kind.as_str(), key))
            .map_err(BrokerError::storage)?;

        match output.attributes() {
            Some(attributes) if !attributes.is_empty() => Ok(()),
            _ => Err(BrokerError::not_found(format!(
                "{} '{}'",
                kind.as_str(),
                key
            ))),
        }
    }
}

fn encode_item<T: Serialize>(
    id: String,
    kind: RecordKind,
    value: &T,
) -> Result<HashMap<String, AttributeValue>> {
    let raw = serde_json::to_string(value)
        .context(format!("Failed to encode {}", id))
        .map_err(BrokerError::storage)?;

    Ok(HashMap::from([
        (ATTR_ID.to_string(), AttributeValue::S(id)),
        (
            ATTR_KIND.to_string(),
            AttributeValue::S(kind.as_str().to_string()),
        ),
        (ATTR_VALUE.to_string(), AttributeValue::S(raw)),
    ]))
}

fn decode_item<T: DeserializeOwned>(
    item: &HashMap<String, AttributeValue>,
    kind: RecordKind,
    key: &str,
) -> Result<T> {
    let raw = item
        .get(ATTR_VALUE)
        .and_then(|value| value.as_s().ok())
        .ok_or_else(|| {
            BrokerError::storage(anyhow::anyhow!(
                "{} '{}' has no value attribute",
                kind.as_str(),
                key
            ))
        })?;

    serde_json::from_str(raw)
        .context(format!("Failed to decode {} '{}'", kind.as_str(), key))
        .map_err(BrokerError::storage)
}

#[async_trait]
impl DataStore for DynamoDbStore {
    async fn put_service_definition(&self, definition: &ServiceDefinition) -> Result<()> {
        self.put(RecordKind::Definition, &definition.id, definition)
            .await
    }

    async fn get_service_definition(&self, service_id: &str) -> Result<ServiceDefinition> {
        self.get(RecordKind::Definition, service_id).await
    }

    async fn get_param(&self, name: &str) -> Result<String> {
        self.get(RecordKind::Param, name).await
    }

    async fn put_param(&self, name: &str, value: &str) -> Result<()> {
        self.put(RecordKind::Param, name, &value).await
    }

    async fn get_service_instance(&self, instance_id: &str) -> Result<ServiceInstance> {
        self.get(RecordKind::Instance, instance_id).await
    }

    async fn put_service_instance(&self, instance: &ServiceInstance) -> Result<()> {
        self.put(RecordKind::Instance, &instance.id, instance).await
    }

    async fn delete_service_instance(&self, instance_id: &str) -> Result<()> {
        self.delete(RecordKind::Instance, instance_id).await
    }

    async fn get_service_binding(&self, binding_id: &str) -> Result<ServiceBinding> {
        self.get(RecordKind::Binding, binding_id).await
    }

    async fn put_service_binding(&self, binding: &ServiceBinding) -> Result<()> {
        self.put(RecordKind::Binding, &binding.id, binding).await
    }

    async fn delete_service_binding(&self, binding_id: &str) -> Result<()> {
        self.delete(RecordKind::Binding, binding_id).await
    }
}

#[cfg(test)]
#[path = "dynamodb_tests.rs"]
mod tests;
