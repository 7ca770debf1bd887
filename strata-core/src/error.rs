//! Error types for strata operations

use thiserror::Error;

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {dependency} unavailable: {reason}")]
    Unavailable { dependency: String, reason: String },

    #[error("Store {dependency} backend error on {operation}: {reason}")]
    Backend {
        dependency: String,
        operation: String,
        reason: String,
    },

    #[error("Store {dependency} timed out on {operation} after {timeout_ms}ms")]
    Timeout {
        dependency: String,
        operation: String,
        timeout_ms: u64,
    },
}

/// Circuit breaker rejections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("Circuit open for {dependency}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        dependency: String,
        retry_after_ms: u64,
    },

    #[error("Circuit half-open for {dependency}, trial capacity exhausted")]
    HalfOpenSaturated { dependency: String },
}

/// Validation errors. Raised before anything is written to a tier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("Invalid TTL for {key:?}: {reason}")]
    InvalidTtl { key: String, reason: String },

    #[error("Value for {key:?} rejected: {reason}")]
    Rejected { key: String, reason: String },
}

/// Serialization errors for values crossing the durable boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Failed to encode value for {key:?}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode value for {key:?}: {reason}")]
    Decode { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all strata errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Resilience error: {0}")]
    Resilience(#[from] ResilienceError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure reported by a caller-supplied source of truth.
    #[error("Source {dependency} failed: {reason}")]
    Source { dependency: String, reason: String },

    /// A caller-supplied fetch, write or refresh exceeded its deadline.
    #[error("Source {dependency} timed out after {timeout_ms}ms")]
    SourceTimeout { dependency: String, timeout_ms: u64 },
}

impl StrataError {
    /// Convenience constructor for source-of-truth failures.
    pub fn source(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Source {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    pub fn source_timeout(dependency: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::SourceTimeout {
            dependency: dependency.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// True when the call was rejected by a breaker without being attempted.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Resilience(_))
    }

    /// True when the call exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Timeout { .. }) | Self::SourceTimeout { .. }
        )
    }

    /// True for failures that mean the durable tier could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Resilience(_))
    }
}

/// Result type alias for strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================
