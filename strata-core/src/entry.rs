//! Cache entry, key and lookup types.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::elapsed_between;
use crate::config::CacheConfig;
use crate::constants::NAMESPACE_SEPARATOR;
use crate::error::{StrataResult, ValidationError};
use crate::Timestamp;

/// Types that can be held in any tier.
///
/// Values are cloned out of the fast tier and serialized into the durable
/// tier, and must cross task boundaries for background refreshes.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

// ============================================================================
// PROVENANCE
// ============================================================================

/// Which tier actually served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// In-process fast tier
    Fast,
    /// Durable key-value store
    Durable,
    /// Fetched from the source of truth on a full miss
    Fresh,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Durable => "durable",
            Self::Fresh => "fresh",
        }
    }

    /// True when served from either cache tier.
    pub fn is_cache(&self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A value plus the metadata every tier keeps about it.
///
/// An entry is expired once more than `ttl_seconds` have passed since
/// `created_at`. Entries are replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: Timestamp,
    pub ttl_seconds: u64,
    pub hit_count: u64,
    pub provenance: Provenance,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, created_at: Timestamp, ttl_seconds: u64, provenance: Provenance) -> Self {
        Self {
            data,
            created_at,
            ttl_seconds,
            hit_count: 0,
            provenance,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Time since creation as of `now`.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        elapsed_between(self.created_at, now)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.age_at(now) > self.ttl()
    }

    /// Lifetime left as of `now`, zero once expired.
    pub fn remaining_at(&self, now: Timestamp) -> Duration {
        self.ttl().saturating_sub(self.age_at(now))
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Map the payload, keeping metadata.
    pub fn map<U, F>(self, f: F) -> CacheEntry<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheEntry {
            data: f(self.data),
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
            hit_count: self.hit_count,
            provenance: self.provenance,
        }
    }
}

// ============================================================================
// CACHE KEY
// ============================================================================

/// A validated cache key of the form `namespace:key`.
///
/// Namespaces may not contain the separator, so the first `:` always marks
/// the namespace boundary and prefix scans of `namespace:` never reach into
/// another namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    full: String,
    namespace_len: Option<usize>,
}

impl CacheKey {
    /// Build a namespaced key.
    pub fn new(namespace: &str, key: &str) -> StrataResult<Self> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        Ok(Self {
            full: format!("{namespace}{NAMESPACE_SEPARATOR}{key}"),
            namespace_len: Some(namespace.len()),
        })
    }

    /// Build a key with no namespace.
    ///
    /// Bare keys may not contain the separator, otherwise `price:AAPL` would
    /// be cleared and listed as part of the `price` namespace.
    pub fn bare(key: &str) -> StrataResult<Self> {
        validate_key(key)?;
        if key.contains(NAMESPACE_SEPARATOR) {
            return Err(ValidationError::InvalidKey {
                key: key.to_string(),
                reason: format!("keys without a namespace must not contain {NAMESPACE_SEPARATOR:?}"),
            }
            .into());
        }
        Ok(Self {
            full: key.to_string(),
            namespace_len: None,
        })
    }

    /// Build the key a per-call config addresses.
    pub fn for_config(key: &str, config: &CacheConfig) -> StrataResult<Self> {
        match config.namespace.as_deref() {
            Some(namespace) => Self::new(namespace, key),
            None => Self::bare(key),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace_len.map(|len| &self.full[..len])
    }

    /// The key without its namespace.
    pub fn local_key(&self) -> &str {
        match self.namespace_len {
            Some(len) => &self.full[len + NAMESPACE_SEPARATOR.len_utf8()..],
            None => &self.full,
        }
    }

    /// Prefix shared by every key in `namespace`.
    pub fn namespace_prefix(namespace: &str) -> StrataResult<String> {
        validate_namespace(namespace)?;
        Ok(format!("{namespace}{NAMESPACE_SEPARATOR}"))
    }

    pub fn into_string(self) -> String {
        self.full
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

fn validate_namespace(namespace: &str) -> StrataResult<()> {
    if namespace.is_empty() {
        return Err(ValidationError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason: "must not be empty".to_string(),
        }
        .into());
    }
    if namespace.contains(NAMESPACE_SEPARATOR) {
        return Err(ValidationError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason: format!("must not contain {NAMESPACE_SEPARATOR:?}"),
        }
        .into());
    }
    Ok(())
}

fn validate_key(key: &str) -> StrataResult<()> {
    if key.is_empty() {
        return Err(ValidationError::InvalidKey {
            key: key.to_string(),
            reason: "must not be empty".to_string(),
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// LOOKUP RESULT
// ============================================================================

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
    /// `None` on a full miss.
    pub data: Option<T>,
    /// Tier that served the read, `None` on a full miss.
    pub provenance: Option<Provenance>,
    /// The value is inside its stale-while-revalidate grace window.
    pub is_stale: bool,
    /// When the served value was originally written.
    pub created_at: Option<Timestamp>,
}

impl<T> CacheLookup<T> {
    pub fn miss() -> Self {
        Self {
            data: None,
            provenance: None,
            is_stale: false,
            created_at: None,
        }
    }

    pub fn hit(entry: CacheEntry<T>, is_stale: bool) -> Self {
        Self {
            provenance: Some(entry.provenance),
            created_at: Some(entry.created_at),
            data: Some(entry.data),
            is_stale,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_miss(&self) -> bool {
        self.data.is_none()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_entry_expiry_is_strict() {
        let created = Utc::now();
        let entry = CacheEntry::new(1u32, created, 60, Provenance::Fast);

        assert!(!entry.is_expired_at(created + chrono::Duration::seconds(60)));
        assert!(entry.is_expired_at(created + chrono::Duration::seconds(61)));
        assert_eq!(
            entry.remaining_at(created + chrono::Duration::seconds(45)),
            Duration::from_secs(15)
        );
        assert_eq!(
            entry.remaining_at(created + chrono::Duration::seconds(90)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_namespaced_key_layout() {
        let key = CacheKey::new("price", "AAPL").unwrap();
        assert_eq!(key.as_str(), "price:AAPL");
        assert_eq!(key.namespace(), Some("price"));
        assert_eq!(key.local_key(), "AAPL");
        assert!(key.as_str().starts_with(&CacheKey::namespace_prefix("price").unwrap()));
    }

    #[test]
    fn test_local_key_may_contain_separator() {
        let key = CacheKey::new("ohlc", "AAPL:1d").unwrap();
        assert_eq!(key.namespace(), Some("ohlc"));
        assert_eq!(key.local_key(), "AAPL:1d");
    }

    #[test]
    fn test_invalid_keys_rejected() {
        assert!(CacheKey::new("", "k").is_err());
        assert!(CacheKey::new("a:b", "k").is_err());
        assert!(CacheKey::new("ns", "").is_err());
        assert!(CacheKey::bare("").is_err());
    }

    #[test]
    fn test_key_for_config() {
        let namespaced = CacheKey::for_config("AAPL", &CacheConfig::new(60).with_namespace("price"))
            .unwrap();
        assert_eq!(namespaced.as_str(), "price:AAPL");

        let bare = CacheKey::for_config("AAPL", &CacheConfig::new(60)).unwrap();
        assert_eq!(bare.as_str(), "AAPL");
        assert_eq!(bare.namespace(), None);
    }

    #[test]
    fn test_bare_key_cannot_alias_namespace() {
        assert!(CacheKey::bare("price:AAPL").is_err());
        assert!(CacheKey::for_config("price:AAPL", &CacheConfig::new(60)).is_err());
        assert!(CacheKey::for_config("AAPL:1d", &CacheConfig::new(60).with_namespace("ohlc")).is_ok());
    }

    #[test]
    fn test_lookup_from_entry() {
        let entry = CacheEntry::new("v", Utc::now(), 10, Provenance::Durable);
        let lookup = CacheLookup::hit(entry, true);
        assert!(lookup.is_hit());
        assert!(lookup.is_stale);
        assert_eq!(lookup.provenance, Some(Provenance::Durable));

        let miss: CacheLookup<String> = CacheLookup::miss();
        assert!(miss.is_miss());
        assert_eq!(miss.provenance, None);
    }
}
