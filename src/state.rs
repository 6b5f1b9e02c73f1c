use crate::{
    errors::{BrokerError, Result},
    models::ServiceInstance,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Debug, Default)]
struct Registry {
    instances: HashMap<String, ServiceInstance>,
    in_flight: HashSet<String>,
}

/// In-memory broker arena: the instance registry and the set of ids with an
/// operation in flight.
///
/// The lock is only taken inside these methods, so callers can never hold it
/// across a network call.
#[derive(Debug, Clone, Default)]
pub struct BrokerState {
    inner: Arc<RwLock<Registry>>,
}

impl BrokerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn instance(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.read().instances.get(instance_id).cloned()
    }

    pub fn put_instance(&self, instance: ServiceInstance) {
        self.write().instances.insert(instance.id.clone(), instance);
    }

    pub fn remove_instance(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.write().instances.remove(instance_id)
    }

    pub fn instance_count(&self) -> usize {
        self.read().instances.len()
    }

    pub fn is_in_flight(&self, key: &OperationKey) -> bool {
        self.read().in_flight.contains(&key.to_string())
    }

    /// Claims `keys` for one operation. Fails with a conflict, claiming
    /// nothing, when any of them is already claimed.
    pub fn begin(&self, keys: &[OperationKey]) -> Result<OperationGuard> {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let mut registry = self.write();

        if let Some(busy) = keys.iter().find(|key| registry.in_flight.contains(*key)) {
            return Err(BrokerError::conflict(format!(
                "another operation on {} is in progress",
                busy
            )));
        }
        registry.in_flight.extend(keys.iter().cloned());

        Ok(OperationGuard {
            state: self.clone(),
            keys,
        })
    }
}

/// Identifier an operation claims while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKey<'a> {
    Instance(&'a str),
    Binding(&'a str),
}

impl std::fmt::Display for OperationKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKey::Instance(id) => write!(f, "instance '{}'", id),
            OperationKey::Binding(id) => write!(f, "binding '{}'", id),
        }
    }
}

/// Releases its claimed ids when dropped.
#[derive(Debug)]
pub struct OperationGuard {
    state: BrokerState,
    keys: Vec<String>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut registry = self.state.write();
        for key in &self.keys {
            registry.in_flight.remove(key);
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
