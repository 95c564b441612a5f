//! Logical key naming
//!
//! These are the keys before the namespace prefix is applied. The data key
//! formats are shared with other services reading the same store and must not
//! change without a version bump. The `index` keys are private to this crate.

use serde_json::{Map, Value};

pub const GEO_QUERY_PREFIX: &str = "geo:query:";
pub const MERCHANT_LOCATION_PREFIX: &str = "merchant:location:";
pub const PAYLOAD_COLLECTION_PREFIX: &str = "payload:collection:";

/// Set of populated geohash buckets
pub const GEO_INDEX_CELLS: &str = "geo:index:cells";
const GEO_INDEX_CELL_PREFIX: &str = "geo:index:cell:";

/// Set of collection names with cached entries
pub const COLLECTIONS_INDEX: &str = "payload:index:collections";
const COLLECTION_INDEX_PREFIX: &str = "payload:index:";

/// Geo query key: `geo:query:{lat}_{lon}_{radiusKm}_{limit}_{filtersJSON}`
///
/// Latitude and longitude are rounded to 4 decimals (about 11 m), the radius
/// to 2 decimals. A missing limit renders as `all`.
pub fn geo_query(
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    limit: Option<usize>,
    filters_json: &str,
) -> String {
    let limit = limit.map_or_else(|| "all".to_string(), |l| l.to_string());
    format!(
        "{}{:.4}_{:.4}_{:.2}_{}_{}",
        GEO_QUERY_PREFIX, latitude, longitude, radius_km, limit, filters_json
    )
}

pub fn merchant_location(merchant_id: &str) -> String {
    format!("{}{}", MERCHANT_LOCATION_PREFIX, merchant_id)
}

pub fn geo_index_cell(bucket: &str) -> String {
    format!("{}{}", GEO_INDEX_CELL_PREFIX, bucket)
}

/// Document key: `payload:collection:{collection}:{id}`
pub fn document(collection: &str, id: &str) -> String {
    format!("{}{}:{}", PAYLOAD_COLLECTION_PREFIX, collection, id)
}

/// Collection query key: `payload:collection:{collection}:query:{hash}`
pub fn collection_query(collection: &str, hash: &str) -> String {
    format!("{}{}:query:{}", PAYLOAD_COLLECTION_PREFIX, collection, hash)
}

/// Every key of a collection, documents and queries alike
pub fn collection_pattern(collection: &str) -> String {
    format!("{}{}:*", PAYLOAD_COLLECTION_PREFIX, collection)
}

pub fn collection_queries_pattern(collection: &str) -> String {
    format!("{}{}:query:*", PAYLOAD_COLLECTION_PREFIX, collection)
}

pub fn collection_documents_index(collection: &str) -> String {
    format!("{}{}:documents", COLLECTION_INDEX_PREFIX, collection)
}

pub fn collection_queries_index(collection: &str) -> String {
    format!("{}{}:queries", COLLECTION_INDEX_PREFIX, collection)
}

/// Recursively sort object keys so equal queries serialize identically
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

/// 32-bit rolling hash (`h = h * 31 + unit`) over the UTF-16 code units of
/// `text`, rendered as lowercase hex of its magnitude.
///
/// Not collision resistant; callers compare the stored query on read.
pub fn fingerprint(text: &str) -> String {
    let hash = text
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32));
    format!("{:x}", hash.unsigned_abs())
}
