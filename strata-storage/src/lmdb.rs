//! LMDB-backed [`PersistentStore`].
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! crash-safe key-value store that survives process restarts.
//!
//! # Value layout
//!
//! `[expires_at: 8 bytes, i64 millis LE, 0 = never][json value]`
//!
//! Expired values are reported as absent and removed on the next read that
//! finds them.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde_json::Value;
use strata_core::{
    SerializationError, SharedClock, StoreError, StrataError, StrataResult, SystemClock, Timestamp,
};

use crate::store::{PersistentStore, WriteOptions};

const HEADER_LEN: usize = 8;
const NO_EXPIRY: i64 = 0;
const DEPENDENCY: &str = "lmdb";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error during {operation}: {reason}")]
    Transaction { operation: &'static str, reason: String },

    #[error("Failed to encode value for {key:?}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Failed to decode value for {key:?}: {reason}")]
    Deserialization { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StrataError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Transaction { operation, reason } => StoreError::Backend {
                dependency: DEPENDENCY.to_string(),
                operation: operation.to_string(),
                reason,
            }
            .into(),
            LmdbStoreError::Serialization { key, reason } => {
                SerializationError::Encode { key, reason }.into()
            }
            LmdbStoreError::Deserialization { key, reason } => {
                SerializationError::Decode { key, reason }.into()
            }
            other => StoreError::Unavailable {
                dependency: DEPENDENCY.to_string(),
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

fn txn_err(operation: &'static str) -> impl FnOnce(heed::Error) -> LmdbStoreError {
    move |e| LmdbStoreError::Transaction {
        operation,
        reason: e.to_string(),
    }
}

/// Durable store in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// use strata_storage::{CacheManager, LmdbStore};
///
/// let store = LmdbStore::new("/var/lib/app/cache", 256)?;
/// let manager = CacheManager::new(Arc::new(store), CacheManagerConfig::from_env())?;
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    clock: SharedClock,
}

impl LmdbStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        Self::with_clock(path, max_size_mb, SystemClock::shared())
    }

    pub fn with_clock<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: SharedClock,
    ) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err("open"))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err("open"))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB store");
        Ok(Self { env, db, clock })
    }

    fn encode(
        &self,
        key: &str,
        value: &Value,
        options: WriteOptions,
    ) -> Result<Vec<u8>, LmdbStoreError> {
        let expires_at = match options.ttl_seconds {
            Some(ttl) => {
                let ttl_ms = i64::try_from(ttl.saturating_mul(1000)).unwrap_or(i64::MAX);
                self.clock
                    .now()
                    .timestamp_millis()
                    .saturating_add(ttl_ms)
            }
            None => NO_EXPIRY,
        };
        let json = serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + json.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    fn expires_at(bytes: &[u8]) -> Option<i64> {
        let header: [u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
        Some(i64::from_le_bytes(header))
    }

    fn is_live(bytes: &[u8], now: Timestamp) -> bool {
        match Self::expires_at(bytes) {
            Some(NO_EXPIRY) => true,
            Some(at) => now.timestamp_millis() <= at,
            None => false,
        }
    }

    /// Number of stored values, expired ones included.
    pub fn len(&self) -> StrataResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_err("len"))?;
        let len = self.db.len(&rtxn).map_err(txn_err("len"))?;
        Ok(len)
    }

    pub fn is_empty(&self) -> StrataResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete `key` if it is still expired as of `now`, re-checked inside
    /// the write transaction so a value written since the read survives.
    fn remove_expired(&self, key: &str, now: Timestamp) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err("expire"))?;
        let expired = matches!(
            self.db.get(&wtxn, key.as_bytes()).map_err(txn_err("expire"))?,
            Some(bytes) if !Self::is_live(bytes, now)
        );
        if !expired {
            return Ok(false);
        }
        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_err("expire"))?;
        wtxn.commit().map_err(txn_err("expire"))?;
        Ok(true)
    }

    fn remove(&self, key: &str, operation: &'static str) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err(operation))?;
        let removed = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_err(operation))?;
        wtxn.commit().map_err(txn_err(operation))?;
        Ok(removed)
    }
}

#[async_trait]
impl PersistentStore for LmdbStore {
    fn name(&self) -> &str {
        DEPENDENCY
    }

    async fn read(&self, key: &str) -> StrataResult<Option<Value>> {
        let now = self.clock.now();
        let value = {
            let rtxn = self.env.read_txn().map_err(txn_err("read"))?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err("read"))? {
                None => return Ok(None),
                Some(bytes) if !Self::is_live(bytes, now) => None,
                Some(bytes) => Some(serde_json::from_slice::<Value>(&bytes[HEADER_LEN..]).map_err(
                    |e| LmdbStoreError::Deserialization {
                        key: key.to_string(),
                        reason: e.to_string(),
                    },
                )?),
            }
        };

        if value.is_none() {
            if let Err(e) = self.remove_expired(key, now) {
                tracing::debug!(key, error = %e, "Failed to remove expired LMDB value");
            }
        }
        Ok(value)
    }

    async fn write(&self, key: &str, value: &Value, options: WriteOptions) -> StrataResult<()> {
        let bytes = self.encode(key, value, options)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err("write"))?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err("write"))?;
        wtxn.commit().map_err(txn_err("write"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        Ok(self.remove(key, "delete")?)
    }

    async fn list_keys(&self, prefix: &str) -> StrataResult<Vec<String>> {
        let now = self.clock.now();
        let rtxn = self.env.read_txn().map_err(txn_err("list_keys"))?;
        let iter = self
            .db
            .prefix_iter(&rtxn, prefix.as_bytes())
            .map_err(txn_err("list_keys"))?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, bytes) = result.map_err(txn_err("list_keys"))?;
            if !Self::is_live(bytes, now) {
                continue;
            }
            match std::str::from_utf8(key) {
                Ok(key) => keys.push(key.to_string()),
                Err(e) => tracing::debug!(error = %e, "Skipping non-UTF-8 LMDB key"),
            }
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("dependency", &DEPENDENCY)
            .finish_non_exhaustive()
    }
}
