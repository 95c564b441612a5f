//! # marketcache
//!
//! Caching layer for a marketplace: documents, query results and merchant
//! locations kept in a remote key-value store with expiring keys.
//!
//! ## Features
//!
//! - 💾 **Key-Value Store**: namespaced JSON values with TTL defaults
//! - 🌍 **Geospatial Cache**: proximity query results, merchant locations,
//!   haversine filtering and area invalidation over a geohash index
//! - 📄 **Document Cache**: per-document and per-query caching with
//!   collection and cascade invalidation
//! - 🔌 **Pluggable Backends**: HTTP store client or in-memory store
//! - 🛡️ **Never Throws**: every operation returns a [`CacheResult`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marketcache::{CacheManager, CacheSettings, MerchantLocation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = CacheManager::new(CacheSettings::from_env()?)?;
//!
//!     let location = MerchantLocation::new(14.5995, 120.9842);
//!     cache.geo().cache_merchant_location("m1", &location, Some(3600)).await;
//!
//!     let nearby = cache
//!         .geo()
//!         .filter_merchants_by_distance::<MerchantLocation, _>(14.60, 120.98, 5.0, &["m1"])
//!         .await;
//!     println!("Nearby: {:?}", nearby.into_option());
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod geo;
pub mod geospatial;
pub mod keys;
pub mod kv;
pub mod manager;
pub mod types;

pub use backend::{HttpBackend, KvBackend, MemoryBackend, glob_match};
pub use config::{CacheConfig, CacheSettings, LoggingConfig, StoreConfig, TtlTier};
pub use document::DocumentCache;
pub use error::{CacheError, Result};
pub use geo::{Coordinate, haversine_km};
pub use geospatial::{GeospatialCache, GeospatialQuery, HasLocation, MerchantLocation, NearbyMerchant};
pub use kv::KeyValueStore;
pub use manager::CacheManager;
pub use types::{CacheResult, GeospatialCacheEntry, PayloadCacheEntry, QueryCacheEntry};
