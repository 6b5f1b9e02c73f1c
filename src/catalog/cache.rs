use crate::models::ServiceDefinition;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrency-safe key-value cache with per-entry expiry.
///
/// Entries are only ever replaced whole, so a reader sees either the old or
/// the new value for a key. Expiry is advisory: `get` keeps serving an
/// expired entry until `evict_expired` removes it.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.read().get(key).map(|entry| entry.value.clone())
    }

    pub fn get_fresh(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.write().insert(key.into(), entry);
    }

    /// Extends the expiry of an existing entry without touching its value.
    pub fn touch(&self, key: &str, ttl: Duration) -> bool {
        match self.write().get_mut(key) {
            Some(entry) => {
                entry.expires_at = Instant::now() + ttl;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.write().remove(key).map(|entry| entry.value)
    }

    /// Swaps in a complete new set of entries in one step.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, V)>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let fresh: HashMap<String, Entry<V>> = entries
            .into_iter()
            .map(|(key, value)| (key, Entry { value, expires_at }))
            .collect();

        *self.write() = fresh;
    }

    pub fn evict_expired(&self) -> Vec<String> {
        self.evict_expired_unless(|_| false)
    }

    /// Evicts expired entries except those whose key `keep` accepts.
    pub fn evict_expired_unless(&self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.write();
        let mut expired: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_expired(now) && !keep(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.remove(key);
        }
        expired.sort();
        expired
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> HashMap<String, V> {
        self.read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Listing (staleness index) and metadata (parsed definitions) views.
#[derive(Debug)]
pub struct CatalogCache {
    pub listing: TtlCache<DateTime<Utc>>,
    pub metadata: TtlCache<Arc<ServiceDefinition>>,
    ttl: Duration,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            listing: TtlCache::new(),
            metadata: TtlCache::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Definitions currently advertised, ordered by name.
    pub fn listed_definitions(&self) -> Vec<Arc<ServiceDefinition>> {
        let mut definitions: Vec<Arc<ServiceDefinition>> = self
            .listing
            .keys()
            .iter()
            .filter_map(|name| self.metadata.get(name))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        definitions
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
