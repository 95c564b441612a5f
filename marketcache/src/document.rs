//! Document cache for the document store's collections
//!
//! Documents live at `payload:collection:{collection}:{id}` and query results
//! at `payload:collection:{collection}:query:{fingerprint}`. Each collection
//! keeps two index sets (documents, queries) so statistics never have to
//! parse key text. Invalidation sweeps the collection's key namespace, which
//! also catches entries other writers put there without indexing them.

use crate::error::Result;
use crate::geospatial::GeospatialQuery;
use crate::keys;
use crate::kv::KeyValueStore;
use crate::types::{CacheResult, PayloadCacheEntry, QueryCacheEntry, now_millis};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const MERCHANTS: &str = "merchants";
pub const ADDRESSES: &str = "addresses";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Documents,
    Queries,
}

impl IndexKind {
    fn index_key(&self, collection: &str) -> String {
        match self {
            IndexKind::Documents => keys::collection_documents_index(collection),
            IndexKind::Queries => keys::collection_queries_index(collection),
        }
    }
}

/// Document and query cache interface
#[derive(Clone)]
pub struct DocumentCache {
    kv: KeyValueStore,
}

impl DocumentCache {
    pub fn new(kv: KeyValueStore) -> Self {
        Self { kv }
    }

    fn resolve_ttl(&self, ttl: Option<u64>) -> u64 {
        ttl.unwrap_or(self.kv.config().default_ttl_seconds)
    }

    async fn register(
        &self,
        collection: &str,
        kind: IndexKind,
        key: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.kv
            .index_add(keys::COLLECTIONS_INDEX, &[collection.to_string()], ttl_secs)
            .await?;
        self.kv
            .index_add(&kind.index_key(collection), &[key.to_string()], ttl_secs)
            .await
    }

    async fn unregister(&self, collection: &str, kind: IndexKind, members: &[String]) {
        if members.is_empty() {
            return;
        }
        if let Err(e) = self.kv.index_remove(&kind.index_key(collection), members).await {
            debug!(collection, error = %e, "could not prune collection index");
        }
    }

    /// Cache one document
    pub async fn cache_document<T>(
        &self,
        collection: &str,
        id: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> CacheResult<()>
    where
        T: Serialize,
    {
        CacheResult::from_outcome(self.try_cache_document(collection, id, data, ttl).await)
    }

    async fn try_cache_document<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let key = keys::document(collection, id);
        let ttl_seconds = self.resolve_ttl(ttl);
        self.register(collection, IndexKind::Documents, &key, ttl_seconds)
            .await?;

        let entry = PayloadCacheEntry {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
            cached_at: now_millis(),
            ttl_seconds,
        };
        self.kv.write(&key, &entry, Some(ttl_seconds)).await
    }

    /// Get one cached document
    ///
    /// Relies on the backend TTL alone; there is no wall-clock re-check for
    /// documents.
    pub async fn get_document<T>(&self, collection: &str, id: &str) -> CacheResult<T>
    where
        T: DeserializeOwned,
    {
        let key = keys::document(collection, id);
        let result = self.kv.read::<PayloadCacheEntry<T>>(&key).await;
        CacheResult::from_lookup(result.map(|entry| entry.map(|e| e.data)))
    }

    /// Cache the results of a parameterized query
    pub async fn cache_query<Q, R>(
        &self,
        collection: &str,
        query: &Q,
        results: &R,
        ttl: Option<u64>,
    ) -> CacheResult<()>
    where
        Q: Serialize,
        R: Serialize,
    {
        CacheResult::from_outcome(self.try_cache_query(collection, query, results, ttl).await)
    }

    async fn try_cache_query<Q: Serialize, R: Serialize>(
        &self,
        collection: &str,
        query: &Q,
        results: &R,
        ttl: Option<u64>,
    ) -> Result<()> {
        let (key, normalized) = query_key(collection, query)?;
        let ttl_seconds = self.resolve_ttl(ttl);
        self.register(collection, IndexKind::Queries, &key, ttl_seconds)
            .await?;

        let entry = QueryCacheEntry {
            collection: Some(collection.to_string()),
            query: normalized,
            results,
            cached_at: now_millis(),
            ttl_seconds,
        };
        self.kv.write(&key, &entry, Some(ttl_seconds)).await
    }

    /// Look up cached results for a query
    ///
    /// Stale entries are deleted and reported as a miss. An entry whose stored
    /// query differs from `query` (a fingerprint collision) is also a miss.
    pub async fn get_query<Q, R>(&self, collection: &str, query: &Q) -> CacheResult<R>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        CacheResult::from_lookup(self.try_get_query(collection, query).await)
    }

    async fn try_get_query<Q: Serialize, R: DeserializeOwned>(
        &self,
        collection: &str,
        query: &Q,
    ) -> Result<Option<R>> {
        let (key, normalized) = query_key(collection, query)?;
        let Some(entry) = self.kv.read::<QueryCacheEntry<Value, R>>(&key).await? else {
            return Ok(None);
        };

        if entry.is_stale_at(now_millis()) {
            warn!(key = %key, cached_at = entry.cached_at, "removing stale query entry");
            self.kv.remove(&key).await?;
            self.unregister(collection, IndexKind::Queries, &[key]).await;
            return Ok(None);
        }
        if entry.query != normalized {
            debug!(key = %key, "query fingerprint collision, treating as miss");
            return Ok(None);
        }
        Ok(Some(entry.results))
    }

    /// Delete exactly one document; `data=true` iff it was cached
    pub async fn invalidate_document(&self, collection: &str, id: &str) -> CacheResult<bool> {
        CacheResult::from_outcome(self.try_invalidate_document(collection, id).await)
    }

    async fn try_invalidate_document(&self, collection: &str, id: &str) -> Result<bool> {
        let key = keys::document(collection, id);
        let removed = self.kv.remove(&key).await?;
        self.unregister(collection, IndexKind::Documents, &[key]).await;
        Ok(removed)
    }

    /// Delete every cached document and query of a collection
    ///
    /// Returns how many entries were removed; a second call right after
    /// returns 0.
    pub async fn invalidate_collection(&self, collection: &str) -> CacheResult<usize> {
        let result = self.try_invalidate_collection(collection).await;
        if let Ok(count) = &result {
            info!(collection, count, "invalidated collection");
        }
        CacheResult::from_count(result)
    }

    async fn try_invalidate_collection(&self, collection: &str) -> Result<usize> {
        let deleted = self
            .kv
            .delete_matching(&keys::collection_pattern(collection))
            .await?;
        self.drop_indexes(collection, &[IndexKind::Documents, IndexKind::Queries])
            .await
            .map_err(|e| e.with_prior_deletions(deleted))?;

        self.kv
            .index_remove(keys::COLLECTIONS_INDEX, &[collection.to_string()])
            .await
            .map_err(|e| e.with_prior_deletions(deleted))?;
        Ok(deleted)
    }

    /// Delete every cached query (but no documents) of a collection
    pub async fn invalidate_collection_queries(&self, collection: &str) -> CacheResult<usize> {
        CacheResult::from_count(self.try_invalidate_queries(collection).await)
    }

    async fn try_invalidate_queries(&self, collection: &str) -> Result<usize> {
        let deleted = self
            .kv
            .delete_matching(&keys::collection_queries_pattern(collection))
            .await?;
        self.drop_indexes(collection, &[IndexKind::Queries])
            .await
            .map_err(|e| e.with_prior_deletions(deleted))?;
        Ok(deleted)
    }

    /// Drop index sets whose keys were just swept
    ///
    /// Runs after the sweep, so an interrupted run leaves the index pointing
    /// at already deleted keys and can be repeated.
    async fn drop_indexes(&self, collection: &str, kinds: &[IndexKind]) -> Result<()> {
        let indexes: Vec<String> = kinds.iter().map(|k| k.index_key(collection)).collect();
        self.kv.remove_many(&indexes).await.map(|_| ())
    }

    /// A merchant changed: drop its document and every cached merchant query
    pub async fn invalidate_merchant_caches(&self, merchant_id: &str) -> CacheResult<usize> {
        CacheResult::from_count(self.try_invalidate_merchant(merchant_id).await)
    }

    async fn try_invalidate_merchant(&self, merchant_id: &str) -> Result<usize> {
        let document = usize::from(self.try_invalidate_document(MERCHANTS, merchant_id).await?);
        let queries = self
            .try_invalidate_queries(MERCHANTS)
            .await
            .map_err(|e| e.with_prior_deletions(document))?;
        info!(merchant_id, count = document + queries, "invalidated merchant caches");
        Ok(document + queries)
    }

    /// An address changed: drop the address document and the whole merchant
    /// collection, documents and queries alike
    ///
    /// No attempt is made to find which merchant entries actually depended on
    /// the address.
    pub async fn invalidate_address_caches(&self, address_id: &str) -> CacheResult<usize> {
        CacheResult::from_count(self.try_invalidate_address(address_id).await)
    }

    async fn try_invalidate_address(&self, address_id: &str) -> Result<usize> {
        let address = usize::from(self.try_invalidate_document(ADDRESSES, address_id).await?);
        let merchants = self
            .try_invalidate_collection(MERCHANTS)
            .await
            .map_err(|e| e.with_prior_deletions(address))?;
        info!(address_id, count = address + merchants, "invalidated address caches");
        Ok(address + merchants)
    }

    /// Number of live cached entries per collection
    ///
    /// Index members whose entry has expired are pruned on the way; collections
    /// with nothing left are omitted.
    pub async fn get_collection_stats(&self) -> CacheResult<BTreeMap<String, usize>> {
        CacheResult::from_outcome(self.try_collection_stats().await)
    }

    async fn try_collection_stats(&self) -> Result<BTreeMap<String, usize>> {
        let mut stats = BTreeMap::new();

        for collection in self.kv.index_members(keys::COLLECTIONS_INDEX).await? {
            let mut live = 0;
            for kind in [IndexKind::Documents, IndexKind::Queries] {
                let mut dead = Vec::new();
                for key in self.kv.index_members(&kind.index_key(&collection)).await? {
                    if self.kv.key_exists(&key).await? {
                        live += 1;
                    } else {
                        dead.push(key);
                    }
                }
                self.unregister(&collection, kind, &dead).await;
            }

            if live > 0 {
                stats.insert(collection, live);
            } else if let Err(e) = self
                .kv
                .index_remove(keys::COLLECTIONS_INDEX, std::slice::from_ref(&collection))
                .await
            {
                debug!(collection = %collection, error = %e, "could not prune collection registry");
            }
        }
        Ok(stats)
    }

    pub async fn cache_merchant<T: Serialize>(
        &self,
        merchant_id: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> CacheResult<()> {
        self.cache_document(MERCHANTS, merchant_id, data, ttl).await
    }

    pub async fn get_merchant<T: DeserializeOwned>(&self, merchant_id: &str) -> CacheResult<T> {
        self.get_document(MERCHANTS, merchant_id).await
    }

    pub async fn cache_address<T: Serialize>(
        &self,
        address_id: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> CacheResult<()> {
        self.cache_document(ADDRESSES, address_id, data, ttl).await
    }

    pub async fn get_address<T: DeserializeOwned>(&self, address_id: &str) -> CacheResult<T> {
        self.get_document(ADDRESSES, address_id).await
    }

    /// Cache merchants found around a location, as a merchant collection query
    pub async fn cache_merchants_by_location<R: Serialize>(
        &self,
        query: &GeospatialQuery,
        merchants: &R,
        ttl: Option<u64>,
    ) -> CacheResult<()> {
        self.cache_query(MERCHANTS, query, merchants, ttl).await
    }

    pub async fn get_merchants_by_location<R: DeserializeOwned>(
        &self,
        query: &GeospatialQuery,
    ) -> CacheResult<R> {
        self.get_query(MERCHANTS, query).await
    }
}

/// Cache key and normalized form of a collection query
fn query_key<Q: Serialize>(collection: &str, query: &Q) -> Result<(String, Value)> {
    let normalized = keys::normalize(serde_json::to_value(query)?);
    let hash = keys::fingerprint(&serde_json::to_string(&normalized)?);
    Ok((keys::collection_query(collection, &hash), normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_key_ignores_field_order() {
        let (a, _) = query_key(MERCHANTS, &json!({"open": true, "cuisine": "thai"})).unwrap();
        let (b, _) = query_key(MERCHANTS, &json!({"cuisine": "thai", "open": true})).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("payload:collection:merchants:query:"));
    }

    #[test]
    fn test_query_key_is_per_collection() {
        let q = json!({"limit": 10});
        let (a, _) = query_key(MERCHANTS, &q).unwrap();
        let (b, _) = query_key(ADDRESSES, &q).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_index_kinds() {
        assert_eq!(
            IndexKind::Documents.index_key("merchants"),
            "payload:index:merchants:documents"
        );
        assert_eq!(
            IndexKind::Queries.index_key("merchants"),
            "payload:index:merchants:queries"
        );
    }
}
