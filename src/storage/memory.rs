use crate::{
    errors::{BrokerError, Result},
    models::{ServiceBinding, ServiceDefinition, ServiceInstance},
    storage::{DataStore, RecordKind},
};
use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, RwLock,
    },
};

/// In-process backend. Records are stored serialized so callers never share
/// state with the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(RecordKind, String), String>>,
    unavailable: AtomicBool,
    failing_writes: Mutex<HashMap<RecordKind, (usize, usize)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lets `skip` more writes (puts or deletes) of `kind` succeed, then fails
    /// the following `count` with a storage error. Reads and other kinds are
    /// unaffected.
    pub fn fail_writes(&self, kind: RecordKind, skip: usize, count: usize) {
        self.failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, (skip, count));
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::storage(anyhow::anyhow!(
                "memory store is unavailable"
            )));
        }
        Ok(())
    }

    fn check_writable(&self, kind: RecordKind) -> Result<()> {
        self.check_available()?;
        let mut failing = self.failing_writes.lock().unwrap_or_else(|e| e.into_inner());
        match failing.get_mut(&kind) {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                Ok(())
            }
            Some((_, count)) if *count > 0 => {
                *count -= 1;
                Err(BrokerError::storage(anyhow::anyhow!(
                    "write of {} rejected",
                    kind.as_str()
                )))
            }
            _ => Ok(()),
        }
    }

    fn get<T: DeserializeOwned>(&self, kind: RecordKind, key: &str) -> Result<T> {
        self.check_available()?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let raw = records
            .get(&(kind, key.to_string()))
            .ok_or_else(|| BrokerError::not_found(format!("{} '{}'", kind.as_str(), key)))?;

        serde_json::from_str(raw)
            .context(format!("Failed to decode {} '{}'", kind.as_str(), key))
            .map_err(BrokerError::storage)
    }

    fn put<T: Serialize>(&self, kind: RecordKind, key: &str, value: &T) -> Result<()> {
        self.check_writable(kind)?;
        let raw = serde_json::to_string(value)
            .context(format!("Failed to encode {} '{}'", kind.as_str(), key))
            .map_err(BrokerError::storage)?;

        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((kind, key.to_string()), raw);
        Ok(())
    }

    fn delete(&self, kind: RecordKind, key: &str) -> Result<()> {
        self.check_writable(kind)?;
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(kind, key.to_string()))
            .map(|_| ())
            .ok_or_else(|| BrokerError::not_found(format!("{} '{}'", kind.as_str(), key)))
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn put_service_definition(&self, definition: &ServiceDefinition) -> Result<()> {
        self.put(RecordKind::Definition, &definition.id, definition)
    }

    async fn get_service_definition(&self, service_id: &str) -> Result<ServiceDefinition> {
        self.get(RecordKind::Definition, service_id)
    }

    async fn get_param(&self, name: &str) -> Result<String> {
        self.get(RecordKind::Param, name)
    }

    async fn put_param(&self, name: &str, value: &str) -> Result<()> {
        self.put(RecordKind::Param, name, &value)
    }

    async fn get_service_instance(&self, instance_id: &str) -> Result<ServiceInstance> {
        self.get(RecordKind::Instance, instance_id)
    }

    async fn put_service_instance(&self, instance: &ServiceInstance) -> Result<()> {
        self.put(RecordKind::Instance, &instance.id, instance)
    }

    async fn delete_service_instance(&self, instance_id: &str) -> Result<()> {
        self.delete(RecordKind::Instance, instance_id)
    }

    async fn get_service_binding(&self, binding_id: &str) -> Result<ServiceBinding> {
        self.get(RecordKind::Binding, binding_id)
    }

    async fn put_service_binding(&self, binding: &ServiceBinding) -> Result<()> {
        self.put(RecordKind::Binding, &binding.id, binding)
    }

    async fn delete_service_binding(&self, binding_id: &str) -> Result<()> {
        self.delete(RecordKind::Binding, binding_id)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
