//! Geospatial cache: proximity query results and merchant location snapshots
//!
//! # Layout
//! ```text
//! geo:query:{lat}_{lon}_{radius}_{limit}_{filters}  -> QueryCacheEntry
//! merchant:location:{id}                            -> GeospatialCacheEntry
//! geo:index:cells                                   -> set of geohash buckets
//! geo:index:cell:{geohash}                          -> set of geo query keys
//! ```
//!
//! Area invalidation walks the bucket index and reads each candidate's stored
//! query center; it never derives coordinates from key text.

use crate::error::{CacheError, Result};
use crate::geo::{Coordinate, area_bucket, bucket_may_intersect, haversine_km};
use crate::keys;
use crate::kv::KeyValueStore;
use crate::types::{CacheResult, GeospatialCacheEntry, QueryCacheEntry, now_millis};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A "what is near this point" query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeospatialQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Extra filters; a `BTreeMap` so serialization order is deterministic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<BTreeMap<String, Value>>,
}

impl GeospatialQuery {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
            limit: None,
            filters: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Validated query center
    pub fn center(&self) -> Result<Coordinate> {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Logical cache key. Queries with equal fields map to the same key;
    /// absent and empty filters are equivalent.
    pub fn cache_key(&self) -> Result<String> {
        let filters_json = match &self.filters {
            Some(filters) => serde_json::to_string(filters)?,
            None => "{}".to_string(),
        };
        Ok(keys::geo_query(
            self.latitude,
            self.longitude,
            self.radius_km,
            self.limit,
            &filters_json,
        ))
    }
}

/// Types that carry a position
pub trait HasLocation {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

/// Minimal merchant location payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MerchantLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl MerchantLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl HasLocation for MerchantLocation {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// A cached merchant found within a search radius
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyMerchant<T> {
    pub id: String,
    pub data: T,
    pub latitude: f64,
    pub longitude: f64,
    /// Distance from the search center in kilometres
    pub distance: f64,
}

/// Geospatial cache interface
#[derive(Clone)]
pub struct GeospatialCache {
    kv: KeyValueStore,
}

impl GeospatialCache {
    pub fn new(kv: KeyValueStore) -> Self {
        Self { kv }
    }

    /// Cache the results of a proximity query
    ///
    /// The query is registered in its geohash bucket before the entry is
    /// written; if registration fails nothing is written, so every cached
    /// query is reachable by [`invalidate_area_cache`](Self::invalidate_area_cache).
    pub async fn cache_geo_query<R>(
        &self,
        query: &GeospatialQuery,
        results: &R,
        ttl: Option<u64>,
    ) -> CacheResult<()>
    where
        R: Serialize,
    {
        CacheResult::from_outcome(self.try_cache_geo_query(query, results, ttl).await)
    }

    async fn try_cache_geo_query<R: Serialize>(
        &self,
        query: &GeospatialQuery,
        results: &R,
        ttl: Option<u64>,
    ) -> Result<()> {
        let center = query.center()?;
        let key = query.cache_key()?;
        let bucket = area_bucket(center)?;
        let ttl_seconds = ttl.unwrap_or(self.kv.config().default_ttl_seconds);

        self.kv
            .index_add(
                keys::GEO_INDEX_CELLS,
                std::slice::from_ref(&bucket),
                ttl_seconds,
            )
            .await?;
        self.kv
            .index_add(
                &keys::geo_index_cell(&bucket),
                std::slice::from_ref(&key),
                ttl_seconds,
            )
            .await?;

        let entry = QueryCacheEntry {
            collection: None,
            query: query.clone(),
            results,
            cached_at: now_millis(),
            ttl_seconds,
        };
        self.kv.write(&key, &entry, Some(ttl_seconds)).await
    }

    /// Look up cached results for a proximity query
    ///
    /// An entry past its own `cached_at + ttl` is deleted and reported as a
    /// miss even if the backing store still holds it.
    pub async fn get_geo_query<R>(&self, query: &GeospatialQuery) -> CacheResult<R>
    where
        R: DeserializeOwned,
    {
        CacheResult::from_lookup(self.try_get_geo_query(query).await)
    }

    async fn try_get_geo_query<R: DeserializeOwned>(
        &self,
        query: &GeospatialQuery,
    ) -> Result<Option<R>> {
        let key = query.cache_key()?;
        let Some(entry) = self
            .kv
            .read::<QueryCacheEntry<GeospatialQuery, R>>(&key)
            .await?
        else {
            return Ok(None);
        };

        if entry.is_stale_at(now_millis()) {
            warn!(key = %key, cached_at = entry.cached_at, "removing stale geo query entry");
            self.kv.remove(&key).await?;
            if let Ok(bucket) = entry.query.center().and_then(area_bucket) {
                if let Err(e) = self
                    .kv
                    .index_remove(&keys::geo_index_cell(&bucket), std::slice::from_ref(&key))
                    .await
                {
                    debug!(key = %key, error = %e, "could not unindex stale geo query");
                }
            }
            return Ok(None);
        }
        Ok(Some(entry.results))
    }

    /// Cache a merchant's location snapshot, keyed by merchant id only
    pub async fn cache_merchant_location<T>(
        &self,
        merchant_id: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> CacheResult<()>
    where
        T: Serialize + HasLocation,
    {
        CacheResult::from_outcome(self.try_cache_merchant_location(merchant_id, data, ttl).await)
    }

    async fn try_cache_merchant_location<T: Serialize + HasLocation>(
        &self,
        merchant_id: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let position = Coordinate::new(data.latitude(), data.longitude())?;
        let ttl_seconds = ttl.unwrap_or(self.kv.config().default_ttl_seconds);
        let entry = GeospatialCacheEntry {
            data,
            latitude: position.latitude,
            longitude: position.longitude,
            cached_at: now_millis(),
            ttl_seconds,
        };
        self.kv
            .write(&keys::merchant_location(merchant_id), &entry, Some(ttl_seconds))
            .await
    }

    /// Get a merchant's cached location snapshot
    pub async fn get_merchant_location<T>(&self, merchant_id: &str) -> CacheResult<T>
    where
        T: DeserializeOwned,
    {
        let result = self.read_location::<T>(merchant_id).await;
        CacheResult::from_lookup(result.map(|entry| entry.map(|e| e.data)))
    }

    async fn read_location<T: DeserializeOwned>(
        &self,
        merchant_id: &str,
    ) -> Result<Option<GeospatialCacheEntry<T>>> {
        let key = keys::merchant_location(merchant_id);
        let Some(entry) = self.kv.read::<GeospatialCacheEntry<T>>(&key).await? else {
            return Ok(None);
        };

        if entry.is_stale_at(now_millis()) {
            warn!(merchant_id, cached_at = entry.cached_at, "removing stale merchant location");
            self.kv.remove(&key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Drop one merchant's location snapshot
    pub async fn invalidate_merchant_location(&self, merchant_id: &str) -> CacheResult<bool> {
        CacheResult::from_outcome(self.kv.remove(&keys::merchant_location(merchant_id)).await)
    }

    /// Cached merchants among `merchant_ids` within `radius_km` of the center,
    /// nearest first
    ///
    /// Ids without a cached location, or whose cached location cannot be
    /// decoded as `T`, are skipped; warm the location cache first when
    /// completeness matters.
    pub async fn filter_merchants_by_distance<T, S>(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_km: f64,
        merchant_ids: &[S],
    ) -> CacheResult<Vec<NearbyMerchant<T>>>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        CacheResult::from_outcome(
            self.try_filter_by_distance(center_lat, center_lon, radius_km, merchant_ids)
                .await,
        )
    }

    async fn try_filter_by_distance<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_km: f64,
        merchant_ids: &[S],
    ) -> Result<Vec<NearbyMerchant<T>>> {
        let center = Coordinate::new(center_lat, center_lon)?;
        let mut nearby = Vec::new();

        for id in merchant_ids {
            let id = id.as_ref();
            let entry = match self.read_location::<T>(id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    debug!(merchant_id = id, "no cached location, skipping");
                    continue;
                }
                Err(CacheError::JsonError(e)) => {
                    warn!(merchant_id = id, error = %e, "undecodable cached location, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let distance = haversine_km(
                center.latitude,
                center.longitude,
                entry.latitude,
                entry.longitude,
            );
            if distance <= radius_km {
                nearby.push(NearbyMerchant {
                    id: id.to_string(),
                    data: entry.data,
                    latitude: entry.latitude,
                    longitude: entry.longitude,
                    distance,
                });
            }
        }

        nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(nearby)
    }

    /// Delete every cached geo query whose center lies within `radius_km` of
    /// the given point; returns how many entries were deleted
    pub async fn invalidate_area_cache(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_km: f64,
    ) -> CacheResult<usize> {
        let result = self
            .try_invalidate_area(center_lat, center_lon, radius_km)
            .await;
        if let Ok(count) = &result {
            info!(center_lat, center_lon, radius_km, count, "invalidated geo area");
        }
        CacheResult::from_count(result)
    }

    async fn try_invalidate_area(
        &self,
        center_lat: f64,
        center_lon: f64,
        radius_km: f64,
    ) -> Result<usize> {
        let center = Coordinate::new(center_lat, center_lon)?;
        let mut deleted = 0;

        for bucket in self.kv.index_members(keys::GEO_INDEX_CELLS).await? {
            match bucket_may_intersect(&bucket, center, radius_km) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "dropping malformed geo bucket");
                    self.kv
                        .index_remove(keys::GEO_INDEX_CELLS, std::slice::from_ref(&bucket))
                        .await
                        .map_err(|e| e.with_prior_deletions(deleted))?;
                    continue;
                }
            }

            let removed = self
                .invalidate_bucket(&bucket, center, radius_km)
                .await
                .map_err(|e| e.with_prior_deletions(deleted))?;
            deleted += removed;
        }
        Ok(deleted)
    }

    async fn invalidate_bucket(
        &self,
        bucket: &str,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<usize> {
        let index = keys::geo_index_cell(bucket);
        let mut expired = Vec::new();
        let mut doomed = Vec::new();

        for key in self.kv.index_members(&index).await? {
            match self
                .kv
                .read::<QueryCacheEntry<GeospatialQuery, IgnoredAny>>(&key)
                .await
            {
                Ok(None) => expired.push(key),
                Ok(Some(entry)) => {
                    let distance = haversine_km(
                        center.latitude,
                        center.longitude,
                        entry.query.latitude,
                        entry.query.longitude,
                    );
                    if distance <= radius_km {
                        doomed.push(key);
                    }
                }
                // An entry we can no longer decode cannot be placed; drop it
                Err(CacheError::JsonError(e)) => {
                    warn!(key = %key, error = %e, "undecodable geo query entry");
                    doomed.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        let deleted = self.kv.remove_many(&doomed).await?;
        expired.extend(doomed);
        if !expired.is_empty() {
            self.kv.index_remove(&index, &expired).await?;
        }
        Ok(deleted)
    }

    /// Delete every merchant location snapshot
    pub async fn clear_merchant_locations(&self) -> CacheResult<usize> {
        let pattern = format!("{}*", keys::MERCHANT_LOCATION_PREFIX);
        CacheResult::from_count(self.kv.delete_matching(&pattern).await)
    }

    /// Delete every cached geo query and merchant location, along with the
    /// area index; returns the number of data entries deleted
    pub async fn clear_all_geo_cache(&self) -> CacheResult<usize> {
        let result = self.try_clear_all().await;
        if let Ok(count) = &result {
            info!(count, "cleared geo cache");
        }
        CacheResult::from_count(result)
    }

    async fn try_clear_all(&self) -> Result<usize> {
        let queries = format!("{}*", keys::GEO_QUERY_PREFIX);
        let locations = format!("{}*", keys::MERCHANT_LOCATION_PREFIX);

        let query_count = self.kv.delete_matching(&queries).await?;
        let location_count = self
            .kv
            .delete_matching(&locations)
            .await
            .map_err(|e| e.with_prior_deletions(query_count))?;
        let deleted = query_count + location_count;

        let mut index_keys = vec![keys::GEO_INDEX_CELLS.to_string()];
        for bucket in self
            .kv
            .index_members(keys::GEO_INDEX_CELLS)
            .await
            .map_err(|e| e.with_prior_deletions(deleted))?
        {
            index_keys.push(keys::geo_index_cell(&bucket));
        }
        self.kv
            .remove_many(&index_keys)
            .await
            .map_err(|e| e.with_prior_deletions(deleted))?;

        Ok(deleted)
    }
}
