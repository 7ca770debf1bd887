//! Bounded in-process cache tier.
//!
//! Pure synchronous memory access: no call here ever suspends, so a `set`
//! that returns is visible to every later `get` in the process.
//!
//! # Eviction
//!
//! When a new key arrives and the tier is full, entries are dropped until
//! `ceil(len * eviction_fraction)` (at least two) are gone: expired entries
//! first, then the oldest by `created_at`. Overwriting an existing key never
//! evicts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use strata_core::constants::FAST_TIER_ENTRY_OVERHEAD_BYTES;
use strata_core::{
    CacheEntry, FastTierConfig, Provenance, SerializationError, SharedClock, StrataResult,
    Timestamp, ValidationError,
};

#[derive(Debug, Clone)]
struct Slot<V> {
    entry: CacheEntry<V>,
    size_bytes: usize,
}

#[derive(Debug)]
struct FastTierInner<V> {
    slots: HashMap<String, Slot<V>>,
    memory_bytes: usize,
}

impl<V> FastTierInner<V> {
    fn remove(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.slots.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(slot.size_bytes);
        Some(slot)
    }

    fn insert(&mut self, key: String, slot: Slot<V>) {
        self.memory_bytes += slot.size_bytes;
        if let Some(previous) = self.slots.insert(key, slot) {
            self.memory_bytes = self.memory_bytes.saturating_sub(previous.size_bytes);
        }
    }
}

/// Counters kept by the fast tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastTierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub estimated_memory_bytes: usize,
}

/// In-memory TTL map with oldest-first eviction.
#[derive(Debug)]
pub struct FastTier<V> {
    inner: Mutex<FastTierInner<V>>,
    config: FastTierConfig,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone + Serialize> FastTier<V> {
    pub fn new(config: FastTierConfig, clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(FastTierInner {
                slots: HashMap::new(),
                memory_bytes: 0,
            }),
            config,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FastTierInner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a live value.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Look up a live entry with its metadata.
    ///
    /// Expired entries are removed on this access and reported as a miss.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        let mut expired = false;

        let found = {
            let mut inner = self.lock();
            let found = match inner.slots.get_mut(key) {
                Some(slot) if slot.entry.is_expired_at(now) => {
                    expired = true;
                    None
                }
                Some(slot) => {
                    slot.entry.hit_count += 1;
                    Some(slot.entry.clone())
                }
                None => None,
            };
            if expired {
                inner.remove(key);
            }
            found
        };

        if expired {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "Fast tier entry expired on access");
        }
        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite `key`, created now.
    pub fn set(&self, key: &str, data: V, ttl_seconds: u64) -> StrataResult<()> {
        let entry = CacheEntry::new(data, self.clock.now(), ttl_seconds, Provenance::Fast);
        self.insert_entry(key, entry)
    }

    /// Insert or overwrite `key` with an entry carrying its own timestamps.
    pub fn insert_entry(&self, key: &str, entry: CacheEntry<V>) -> StrataResult<()> {
        let slot = self.prepare(key, entry)?;
        let mut inner = self.lock();
        if !inner.slots.contains_key(key) && inner.slots.len() >= self.config.max_entries {
            self.evict(&mut inner);
        }
        inner.insert(key.to_string(), slot);
        Ok(())
    }

    /// Copy a durable hit into this tier.
    ///
    /// A live local entry at least as new as `entry` is kept, since it was
    /// written while the durable read was in flight. Returns whether the
    /// entry was inserted.
    pub fn promote(&self, key: &str, entry: CacheEntry<V>) -> StrataResult<bool> {
        let now = self.clock.now();
        if entry.is_expired_at(now) {
            return Ok(false);
        }
        let slot = self.prepare(key, entry)?;

        let mut inner = self.lock();
        let keep_local = inner.slots.get(key).is_some_and(|local| {
            !local.entry.is_expired_at(now) && local.entry.created_at >= slot.entry.created_at
        });
        if keep_local {
            return Ok(false);
        }
        if !inner.slots.contains_key(key) && inner.slots.len() >= self.config.max_entries {
            self.evict(&mut inner);
        }
        inner.insert(key.to_string(), slot);
        Ok(true)
    }

    fn prepare(&self, key: &str, mut entry: CacheEntry<V>) -> StrataResult<Slot<V>> {
        if key.is_empty() {
            return Err(ValidationError::InvalidKey {
                key: String::new(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if entry.ttl_seconds == 0 {
            return Err(ValidationError::InvalidTtl {
                key: key.to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        let value_bytes = serde_json::to_vec(&entry.data)
            .map_err(|e| SerializationError::Encode {
                key: key.to_string(),
                reason: e.to_string(),
            })?
            .len();

        entry.provenance = Provenance::Fast;
        Ok(Slot {
            entry,
            size_bytes: key.len() + value_bytes + FAST_TIER_ENTRY_OVERHEAD_BYTES,
        })
    }

    fn evict(&self, inner: &mut FastTierInner<V>) {
        let now = self.clock.now();
        let held = inner.slots.len();
        // At least two, so the insert that triggered eviction leaves the tier
        // below capacity
        let target = ((held as f64 * self.config.eviction_fraction).ceil() as usize)
            .max(2)
            .min(held);

        let expired: Vec<String> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        let mut removed = expired.len();
        self.expirations
            .fetch_add(removed as u64, Ordering::Relaxed);

        let mut evicted = 0usize;
        if removed < target {
            let mut by_age: Vec<(String, Timestamp)> = inner
                .slots
                .iter()
                .map(|(key, slot)| (key.clone(), slot.entry.created_at))
                .collect();
            by_age.sort_by(|a, b| a.1.cmp(&b.1));

            for (key, _) in by_age.into_iter().take(target - removed) {
                inner.remove(&key);
                evicted += 1;
            }
            removed += evicted;
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        tracing::debug!(
            held,
            removed,
            evicted,
            max_entries = self.config.max_entries,
            "Fast tier full, evicted oldest entries"
        );
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        drop(inner);

        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Remove every key starting with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let matching: Vec<String> = inner
            .slots
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            inner.remove(key);
        }
        matching.len()
    }

    /// Remove everything.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.slots.len();
        inner.slots.clear();
        inner.memory_bytes = 0;
        count
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = self.clock.now();
        let inner = self.lock();
        let mut keys: Vec<String> = inner
            .slots
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && !slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .slots
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Entries held, expired ones not yet swept included.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn estimated_memory_bytes(&self) -> usize {
        self.lock().memory_bytes
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    pub fn stats(&self) -> FastTierStats {
        let (entries, estimated_memory_bytes) = {
            let inner = self.lock();
            (inner.slots.len(), inner.memory_bytes)
        };
        FastTierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries,
            estimated_memory_bytes,
        }
    }
}
