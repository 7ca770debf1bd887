//! Persistent key-value store collaborator.
//!
//! The durable tier talks to the outside world only through this trait.
//! Implementations must be thread-safe; every call may suspend.

use async_trait::async_trait;
use serde_json::Value;
use strata_core::StrataResult;

/// Options accompanying a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Lifetime of the stored value. `None` keeps it until deleted.
    pub ttl_seconds: Option<u64>,
}

impl WriteOptions {
    pub fn with_ttl(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(ttl_seconds),
        }
    }
}

/// External persistent key-value store.
///
/// A missing or expired key is `Ok(None)`, never an error. Errors mean the
/// store could not answer.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Name used as the `dependency` field in logs and errors.
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    async fn read(&self, key: &str) -> StrataResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: &Value, options: WriteOptions) -> StrataResult<()>;

    /// Delete `key`. Returns whether a value was present.
    async fn delete(&self, key: &str) -> StrataResult<bool>;

    /// List keys starting with `prefix`. An empty prefix lists everything.
    async fn list_keys(&self, prefix: &str) -> StrataResult<Vec<String>>;
}
