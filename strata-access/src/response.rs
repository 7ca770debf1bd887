//! Results handed back by [`CachedAccess`](crate::CachedAccess).

use serde::Serialize;
use strata_core::Provenance;

/// Outcome of a cached read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResponse<T> {
    /// `None` when neither the cache nor the source had a value
    pub data: Option<T>,
    pub cache_hit: bool,
    /// Which tier served the read, or `Fresh` when the source did
    pub cache_source: Provenance,
    pub response_time_ms: u64,
}

impl<T> ReadResponse<T> {
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

/// Outcome of a write through to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteResponse {
    pub success: bool,
    /// False when the source write landed but the cache entry could not be
    /// removed
    pub cache_invalidated: bool,
    pub response_time_ms: u64,
}
