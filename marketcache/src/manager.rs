//! Cache manager: wires the backend and the cache components together

use crate::backend::{HttpBackend, KvBackend};
use crate::config::{CacheConfig, CacheSettings};
use crate::document::DocumentCache;
use crate::error::Result;
use crate::geospatial::GeospatialCache;
use crate::kv::KeyValueStore;
use crate::types::CacheResult;
use std::sync::Arc;
use tracing::info;

/// Entry point of the caching layer
///
/// All components share one [`KeyValueStore`], hence one backend connection
/// and one namespace.
#[derive(Clone)]
pub struct CacheManager {
    kv: KeyValueStore,
    geo: GeospatialCache,
    documents: DocumentCache,
}

impl CacheManager {
    /// Create a manager talking to the configured HTTP store
    pub fn new(settings: CacheSettings) -> Result<Self> {
        let backend = HttpBackend::new(&settings.store)?;
        info!(
            endpoint = %backend.base_url(),
            prefix = %settings.cache.key_prefix,
            enabled = settings.cache.enabled,
            "cache manager ready"
        );
        Ok(Self::with_backend(settings.cache, Arc::new(backend)))
    }

    /// Create a manager from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::new(CacheSettings::from_env()?)
    }

    /// Create a manager over an existing backend
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn KvBackend>) -> Self {
        let kv = KeyValueStore::new(backend, config);
        Self {
            geo: GeospatialCache::new(kv.clone()),
            documents: DocumentCache::new(kv.clone()),
            kv,
        }
    }

    /// Get the key-value store interface
    pub fn kv(&self) -> &KeyValueStore {
        &self.kv
    }

    /// Get the geospatial cache interface
    pub fn geo(&self) -> &GeospatialCache {
        &self.geo
    }

    /// Get the document cache interface
    pub fn documents(&self) -> &DocumentCache {
        &self.documents
    }

    pub fn config(&self) -> &CacheConfig {
        self.kv.config()
    }

    pub fn is_enabled(&self) -> bool {
        self.kv.is_enabled()
    }

    /// A merchant record changed
    ///
    /// Drops the merchant document, every cached merchant query and the
    /// merchant's location snapshot. `data` is the number of entries removed.
    pub async fn invalidate_merchant(&self, merchant_id: &str) -> CacheResult<usize> {
        let documents = self.documents.invalidate_merchant_caches(merchant_id).await;
        if !documents.success {
            return documents;
        }
        let location = self.geo.invalidate_merchant_location(merchant_id).await;
        combine(documents, location.map(usize::from))
    }

    /// An address record changed
    ///
    /// Drops the address document, the whole merchant collection, every
    /// merchant location snapshot and every cached geo query.
    pub async fn invalidate_address(&self, address_id: &str) -> CacheResult<usize> {
        let documents = self.documents.invalidate_address_caches(address_id).await;
        if !documents.success {
            return documents;
        }
        let geo = self.geo.clear_all_geo_cache().await;
        combine(documents, geo)
    }

    /// Delete everything in this manager's namespace
    pub async fn reset(&self) -> CacheResult<usize> {
        self.kv.clear().await
    }
}

/// Sum the counts of two consecutive invalidation steps, the first of which
/// succeeded
fn combine(first: CacheResult<usize>, second: CacheResult<usize>) -> CacheResult<usize> {
    let prior = first.data.unwrap_or(0);
    CacheResult {
        data: Some(prior + second.data.unwrap_or(0)),
        ..second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_adds_counts() {
        let res = combine(CacheResult::ok(2), CacheResult::ok(3));
        assert!(res.success);
        assert_eq!(res.data, Some(5));
    }

    #[test]
    fn test_combine_keeps_later_failure() {
        let res = combine(CacheResult::ok(2), CacheResult::failure("connection refused"));
        assert!(!res.success);
        assert_eq!(res.data, Some(2));
        assert_eq!(res.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_new_rejects_bad_endpoint() {
        let mut settings = CacheSettings::default();
        settings.store.endpoint_url = "not a url".to_string();
        assert!(CacheManager::new(settings).is_err());
    }
}
