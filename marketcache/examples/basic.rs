//! Basic cache example
//!
//! Walks through the key-value, geospatial and document caches using the
//! in-memory backend, so no store needs to be running.
//!
//! Usage:
//!   cargo run --example basic

use marketcache::{
    CacheConfig, CacheManager, GeospatialQuery, MemoryBackend, MerchantLocation, TtlTier,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let backend = Arc::new(MemoryBackend::new());
    let cache = CacheManager::with_backend(CacheConfig::new("app:dev:"), backend);

    println!("🚀 marketcache - Basic Example\n");

    // 1. Plain key-value
    println!("1. Setting key 'greeting' for {}s", TtlTier::Short.as_secs());
    cache
        .kv()
        .set("greeting", "Hello, marketplace!", Some(TtlTier::Short.as_secs()))
        .await;
    let value = cache.kv().get::<String>("greeting").await;
    println!("   Value: {:?} (hit: {:?})\n", value.data, value.hit);

    // 2. Merchant locations and distance filtering
    println!("2. Caching merchant locations around Manila");
    let merchants = [
        ("m1", 14.5995, 120.9842),
        ("m2", 14.5547, 121.0244),
        ("m3", 10.3157, 123.8854),
    ];
    for (id, lat, lon) in merchants {
        cache
            .geo()
            .cache_merchant_location(id, &MerchantLocation::new(lat, lon), None)
            .await;
    }

    let nearby = cache
        .geo()
        .filter_merchants_by_distance::<MerchantLocation, _>(14.60, 120.98, 10.0, &["m1", "m2", "m3"])
        .await;
    for m in nearby.into_option().unwrap_or_default() {
        println!("   {} at {:.2} km", m.id, m.distance);
    }
    println!();

    // 3. Proximity query results
    println!("3. Caching a proximity query");
    let query = GeospatialQuery::new(14.60, 120.98, 10.0).with_limit(20).with_filter("open", true);
    cache.geo().cache_geo_query(&query, &vec!["m1", "m2"], None).await;
    let cached = cache.geo().get_geo_query::<Vec<String>>(&query).await;
    println!("   Cached results: {:?}\n", cached.data);

    // 4. Documents and cascade invalidation
    println!("4. Caching merchant and address documents");
    cache
        .documents()
        .cache_merchant("m1", &json!({"name": "Lola's Kitchen", "addressId": "a1"}), None)
        .await;
    cache
        .documents()
        .cache_address("a1", &json!({"street": "Roxas Blvd"}), None)
        .await;

    let stats = cache.documents().get_collection_stats().await;
    println!("   Collection stats: {:?}", stats.data);

    println!("5. Address a1 changed, invalidating dependent caches");
    let removed = cache.invalidate_address("a1").await;
    println!("   Removed {} entries", removed.data.unwrap_or(0));

    let gone = cache.documents().get_merchant::<serde_json::Value>("m1").await;
    println!("   Merchant m1 still cached: {}\n", gone.is_hit());

    println!("✅ Example completed successfully!");

    Ok(())
}
