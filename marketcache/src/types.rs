//! Common types shared by the cache components

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Uniform return value of every cache operation.
///
/// `success=false` means the cache could not be consulted (transport or
/// serialization failure, or caching disabled). A miss is `success=true,
/// hit=Some(false)`. Callers branch on `success` first, then on `hit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> CacheResult<T> {
    /// Successful lookup that found a value
    pub fn hit(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            hit: Some(true),
            error: None,
        }
    }

    /// Successful lookup that found nothing
    pub fn miss() -> Self {
        Self {
            success: true,
            data: None,
            hit: Some(false),
            error: None,
        }
    }

    /// Successful write or command
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            hit: None,
            error: None,
        }
    }

    /// Failed operation
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            hit: None,
            error: Some(error.into()),
        }
    }

    /// Fold the outcome of a lookup: `Some` is a hit, `None` a miss.
    pub fn from_lookup(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(data)) => Self::hit(data),
            Ok(None) => Self::miss(),
            Err(e) => Self::from_error(e),
        }
    }

    /// Fold the outcome of a write or command.
    pub fn from_outcome(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(e),
        }
    }

    fn from_error(error: CacheError) -> Self {
        if !error.is_disabled() {
            warn!(error = %error, "cache operation failed");
        }
        Self::failure(error.to_string())
    }

    /// True only for a successful lookup that found a value
    pub fn is_hit(&self) -> bool {
        self.success && self.hit == Some(true)
    }

    /// Collapse into an `Option`, treating failures as misses.
    ///
    /// The cache is advisory: a failed lookup is a reason to go to the source
    /// of truth, not an error for the caller.
    pub fn into_option(self) -> Option<T> {
        if self.success { self.data } else { None }
    }

    /// Map the carried data, keeping the status fields
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
        CacheResult {
            success: self.success,
            data: self.data.map(f),
            hit: self.hit,
            error: self.error,
        }
    }
}

impl CacheResult<usize> {
    /// Fold the outcome of a bulk deletion.
    ///
    /// An interrupted deletion is a failure that still reports how many keys
    /// were confirmed deleted.
    pub fn from_count(result: Result<usize>) -> Self {
        match result {
            Err(CacheError::PartialDelete { deleted, reason }) => {
                warn!(deleted, reason = %reason, "bulk invalidation incomplete");
                Self {
                    success: false,
                    data: Some(deleted),
                    hit: None,
                    error: Some(reason),
                }
            }
            other => Self::from_outcome(other),
        }
    }
}

/// Per-entity location snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeospatialCacheEntry<T> {
    pub data: T,
    pub latitude: f64,
    pub longitude: f64,
    pub cached_at: i64,
    pub ttl_seconds: u64,
}

/// One cached document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadCacheEntry<T> {
    pub collection: String,
    pub id: String,
    pub data: T,
    pub cached_at: i64,
    pub ttl_seconds: u64,
}

/// Cached result set of a parameterized query.
///
/// `Q` is the stored query: a [`GeospatialQuery`](crate::GeospatialQuery) for
/// proximity queries, the normalized JSON query for collection queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCacheEntry<Q, R> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub query: Q,
    pub results: R,
    pub cached_at: i64,
    pub ttl_seconds: u64,
}

/// Wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether an entry written at `cached_at` with `ttl_seconds` is past its TTL at `now`.
///
/// Checked on read independently of the backend's own expiry, so an entry
/// whose TTL failed to apply upstream is still treated as gone.
pub fn is_stale(cached_at: i64, ttl_seconds: u64, now: i64) -> bool {
    let age_ms = now.saturating_sub(cached_at);
    age_ms > (ttl_seconds as i64).saturating_mul(1000)
}

impl<T> GeospatialCacheEntry<T> {
    pub fn is_stale_at(&self, now: i64) -> bool {
        is_stale(self.cached_at, self.ttl_seconds, now)
    }
}

impl<Q, R> QueryCacheEntry<Q, R> {
    pub fn is_stale_at(&self, now: i64) -> bool {
        is_stale(self.cached_at, self.ttl_seconds, now)
    }
}
