//! Namespaced key-value store
//!
//! Owns key prefixing, JSON serialization and TTL defaults. Every other
//! component reaches the backend through this type.

use crate::backend::KvBackend;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::types::CacheResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keys deleted per backend call during bulk invalidation
const DELETE_BATCH_SIZE: usize = 100;

/// Key-value store bound to one namespace
///
/// Cloning is cheap and shares the backend connection.
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn KvBackend>,
    config: Arc<CacheConfig>,
}

impl KeyValueStore {
    /// Create a store over `backend` using `config` for prefix, TTL and enablement
    ///
    /// Namespaces are matched by plain string prefix. Two stores whose
    /// prefixes nest (`app:` and `app:prod:`) share keys, and [`clear`]
    /// on the outer one deletes the inner one's entries too. Prefixes should
    /// end with `:` and must not nest; a prefix without a trailing delimiter
    /// is logged as a warning.
    ///
    /// [`clear`]: KeyValueStore::clear
    pub fn new(backend: Arc<dyn KvBackend>, config: CacheConfig) -> Self {
        if !is_delimited(&config.key_prefix) {
            warn!(
                prefix = %config.key_prefix,
                "Key prefix does not end with ':'; it may overlap other namespaces"
            );
        }
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Physical key for a logical key
    pub fn physical_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn logical_key(&self, physical: &str) -> Option<String> {
        physical
            .strip_prefix(self.config.key_prefix.as_str())
            .map(str::to_string)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(CacheError::Disabled)
        }
    }

    fn resolve_ttl(&self, ttl: Option<u64>) -> u64 {
        ttl.unwrap_or(self.config.default_ttl_seconds)
    }

    /// Set a key-value pair
    ///
    /// `ttl` defaults to the configured `default_ttl_seconds`. On success the
    /// value is handed back in `data`.
    ///
    /// # Example
    /// ```no_run
    /// # use marketcache::{CacheConfig, KeyValueStore, MemoryBackend};
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let kv = KeyValueStore::new(Arc::new(MemoryBackend::new()), CacheConfig::new("app:"));
    /// let res = kv.set("session:abc", "token123", Some(3600)).await;
    /// assert!(res.success);
    /// # }
    /// ```
    pub async fn set<T>(&self, key: &str, value: T, ttl: Option<u64>) -> CacheResult<T>
    where
        T: Serialize,
    {
        match self.write(key, &value, ttl).await {
            Ok(()) => CacheResult::ok(value),
            Err(e) => CacheResult::from_outcome(Err(e)),
        }
    }

    /// Get a value by key
    ///
    /// A missing or expired key is a miss (`success=true, hit=false`). A
    /// value that does not decode into `T` is an error.
    pub async fn get<T>(&self, key: &str) -> CacheResult<T>
    where
        T: DeserializeOwned,
    {
        CacheResult::from_lookup(self.read(key).await)
    }

    /// Delete a key; `data=true` iff a key was actually removed
    pub async fn del(&self, key: &str) -> CacheResult<bool> {
        CacheResult::from_outcome(self.remove(key).await)
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        CacheResult::from_outcome(self.key_exists(key).await)
    }

    /// Reset the TTL of an existing key without rewriting its value
    pub async fn expire(&self, key: &str, ttl: u64) -> CacheResult<bool> {
        CacheResult::from_outcome(self.reset_ttl(key, ttl).await)
    }

    /// Delete every key in this namespace
    ///
    /// Meant for full resets such as test teardown: it enumerates the whole
    /// namespace and is not atomic with respect to concurrent writers. Keys of
    /// a store with a nested prefix match too; see [`KeyValueStore::new`].
    pub async fn clear(&self) -> CacheResult<usize> {
        let result = self.delete_matching("*").await;
        if let Ok(count) = &result {
            info!(prefix = %self.config.key_prefix, count, "cleared cache namespace");
        }
        CacheResult::from_count(result)
    }

    pub(crate) async fn write<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_enabled()?;
        let ttl = self.resolve_ttl(ttl);
        let text = serde_json::to_string(value)?;
        debug!(key, ttl, size = text.len(), "SET");
        self.backend.set(&self.physical_key(key), text, ttl).await
    }

    pub(crate) async fn read<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.ensure_enabled()?;
        debug!(key, "GET");
        match self.backend.get(&self.physical_key(key)).await? {
            Some(value) => decode(value).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<bool> {
        self.ensure_enabled()?;
        debug!(key, "DEL");
        let removed = self.backend.del(&[self.physical_key(key)]).await?;
        Ok(removed > 0)
    }

    pub(crate) async fn reset_ttl(&self, key: &str, ttl: u64) -> Result<bool> {
        self.ensure_enabled()?;
        debug!(key, ttl, "EXPIRE");
        self.backend.expire(&self.physical_key(key), ttl).await
    }

    pub(crate) async fn key_exists(&self, key: &str) -> Result<bool> {
        self.ensure_enabled()?;
        self.backend.exists(&self.physical_key(key)).await
    }

    /// Delete logical keys in batches.
    ///
    /// Batches already deleted are not rolled back when a later one fails;
    /// the error then carries the confirmed count.
    pub(crate) async fn remove_many(&self, keys: &[String]) -> Result<usize> {
        self.ensure_enabled()?;
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let physical: Vec<String> = chunk.iter().map(|k| self.physical_key(k)).collect();
            match self.backend.del(&physical).await {
                Ok(n) => deleted += n,
                Err(e) if deleted > 0 => {
                    warn!(deleted, error = %e, "bulk delete interrupted");
                    return Err(CacheError::PartialDelete {
                        deleted,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Logical keys in this namespace matching a glob `pattern`
    pub(crate) async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_enabled()?;
        debug!(pattern, "KEYS");
        let physical = self.backend.keys(&self.physical_key(pattern)).await?;
        Ok(physical
            .iter()
            .filter_map(|k| self.logical_key(k))
            .collect())
    }

    pub(crate) async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let keys = self.keys_matching(pattern).await?;
        self.remove_many(&keys).await
    }

    /// Register `members` in the set stored at `index`
    ///
    /// The set's TTL is raised to `ttl_secs` when it would otherwise expire
    /// first, so an index lives as long as its longest-lived member.
    pub(crate) async fn index_add(
        &self,
        index: &str,
        members: &[String],
        ttl_secs: u64,
    ) -> Result<()> {
        self.ensure_enabled()?;
        let physical = self.physical_key(index);
        self.backend.set_add(&physical, members).await?;

        let remaining = self.backend.ttl(&physical).await?;
        if remaining.is_none_or(|secs| secs < ttl_secs) {
            debug!(index, ttl_secs, "EXPIRE index");
            self.backend.expire(&physical, ttl_secs).await?;
        }
        Ok(())
    }

    pub(crate) async fn index_members(&self, index: &str) -> Result<Vec<String>> {
        self.ensure_enabled()?;
        self.backend.set_members(&self.physical_key(index)).await
    }

    pub(crate) async fn index_remove(&self, index: &str, members: &[String]) -> Result<usize> {
        self.ensure_enabled()?;
        self.backend
            .set_remove(&self.physical_key(index), members)
            .await
    }
}

/// An empty prefix or one ending in `:` cannot swallow a sibling namespace
fn is_delimited(prefix: &str) -> bool {
    prefix.is_empty() || prefix.ends_with(':')
}

/// Decode a stored value into `T`.
///
/// Values normally arrive as JSON text. A value the service already returns
/// structured is used as is, and opaque text that is not JSON is tried as a
/// plain string.
fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    match value {
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(decoded) => Ok(decoded),
            Err(parse_err) => {
                serde_json::from_value(Value::String(text)).map_err(|_| parse_err.into())
            }
        },
        structured => Ok(serde_json::from_value(structured)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Merchant {
        name: String,
    }

    #[test]
    fn test_decode_json_text() {
        let merchant: Merchant = decode(Value::String(r#"{"name":"Lola's"}"#.into())).unwrap();
        assert_eq!(merchant.name, "Lola's");
    }

    #[test]
    fn test_decode_structured_value_not_double_decoded() {
        let merchant: Merchant = decode(json!({"name": "Lola's"})).unwrap();
        assert_eq!(merchant.name, "Lola's");
    }

    #[test]
    fn test_decode_opaque_string() {
        let text: String = decode(Value::String("plain text".into())).unwrap();
        assert_eq!(text, "plain text");

        let quoted: String = decode(Value::String("\"quoted\"".into())).unwrap();
        assert_eq!(quoted, "quoted");
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        let res: Result<Merchant> = decode(json!({"title": "x"}));
        assert!(matches!(res, Err(CacheError::JsonError(_))));
    }

    #[test]
    fn test_prefix_delimiter() {
        assert!(is_delimited("app:prod:"));
        assert!(is_delimited(""));
        assert!(!is_delimited("app"));
        assert!(!is_delimited("app:prod"));
    }
}
