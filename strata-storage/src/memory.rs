//! In-process [`PersistentStore`] with TTL expiry.
//!
//! Useful for single-node deployments and as the durable tier in tests.
//! Expiry is checked lazily against the injected clock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use strata_core::{SharedClock, StrataResult, SystemClock, Timestamp};

use crate::store::{PersistentStore, WriteOptions};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Option<Timestamp>,
}

impl StoredValue {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |at| now <= at)
    }
}

/// HashMap-backed store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    values: Arc<RwLock<HashMap<String, StoredValue>>>,
    clock: SharedClock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            name: "memory".to_string(),
            values: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Override the dependency name reported in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of stored values, expired ones included.
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored value.
    pub fn clear(&self) {
        if let Ok(mut values) = self.values.write() {
            values.clear();
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, key: &str) -> StrataResult<Option<Value>> {
        let now = self.clock.now();
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone()))
    }

    async fn write(&self, key: &str, value: &Value, options: WriteOptions) -> StrataResult<()> {
        let now = self.clock.now();
        let expires_at = options.ttl_seconds.and_then(|ttl| {
            chrono::Duration::from_std(Duration::from_secs(ttl))
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
        });

        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(
            key.to_string(),
            StoredValue {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        Ok(values.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> StrataResult<Vec<String>> {
        let now = self.clock.now();
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = values
            .iter()
            .filter(|(key, stored)| key.starts_with(prefix) && stored.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
