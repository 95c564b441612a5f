//! In-process backend for tests and local development

use super::{KvBackend, glob_match, literal_prefix};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
enum Payload {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Payload,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(payload: Payload, ttl_secs: Option<u64>) -> Self {
        Self {
            payload,
            expires_at: ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires| Instant::now() >= expires)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::ServerError(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

/// Key-value store kept in a radix trie, with the same semantics as the remote
/// service: lazy expiry, glob key enumeration and string sets.
///
/// Clones share the same data, so one instance can back several
/// [`KeyValueStore`](crate::KeyValueStore)s with different prefixes.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Trie<String, StoredValue>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().iter().filter(|(_, v)| !v.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a key if it has expired; returns true if the key is still live.
    fn evict_if_expired(data: &mut Trie<String, StoredValue>, key: &str) -> bool {
        match data.get(key) {
            Some(value) if value.is_expired() => {
                debug!("Key expired: {}", key);
                data.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        debug!("SET key={}, size={}, ttl={}", key, value.len(), ttl_secs);
        let stored = StoredValue::new(Payload::Text(value), Some(ttl_secs));
        self.data.write().insert(key.to_string(), stored);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut data = self.data.write();
        if !Self::evict_if_expired(&mut data, key) {
            return Ok(None);
        }
        match data.get(key).map(|v| &v.payload) {
            Some(Payload::Text(text)) => Ok(Some(Value::String(text.clone()))),
            Some(Payload::Set(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        let mut data = self.data.write();
        let mut removed = 0;
        for key in keys {
            if let Some(value) = data.remove(key.as_str()) {
                if !value.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let data = self.data.read();
        Ok(data.get(key).is_some_and(|v| !v.is_expired()))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut data = self.data.write();
        if !Self::evict_if_expired(&mut data, key) {
            return Ok(false);
        }
        match data.get_mut(key) {
            Some(value) => {
                value.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let data = self.data.read();
        Ok(data
            .get(key)
            .filter(|v| !v.is_expired())
            .and_then(|v| v.expires_at)
            .map(|expires| expires.saturating_duration_since(Instant::now()).as_secs()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = literal_prefix(pattern);
        let data = self.data.read();

        let live = |(k, v): (&String, &StoredValue)| {
            (!v.is_expired() && glob_match(pattern, k)).then(|| k.clone())
        };

        let keys = if prefix.is_empty() {
            data.iter().filter_map(live).collect()
        } else {
            data.get_raw_descendant(prefix)
                .map(|subtrie| subtrie.iter().filter_map(live).collect())
                .unwrap_or_default()
        };
        Ok(keys)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize> {
        let mut data = self.data.write();
        Self::evict_if_expired(&mut data, key);

        if data.get(key).is_none() {
            data.insert(
                key.to_string(),
                StoredValue::new(Payload::Set(HashSet::new()), None),
            );
        }
        match data.get_mut(key).map(|v| &mut v.payload) {
            Some(Payload::Set(set)) => Ok(members
                .iter()
                .filter(|m| set.insert((*m).clone()))
                .count()),
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.read();
        match data.get(key) {
            Some(value) if value.is_expired() => Ok(Vec::new()),
            Some(StoredValue {
                payload: Payload::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize> {
        let mut data = self.data.write();
        if !Self::evict_if_expired(&mut data, key) {
            return Ok(0);
        }
        let (removed, now_empty) = match data.get_mut(key).map(|v| &mut v.payload) {
            Some(Payload::Set(set)) => {
                let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
                (removed, set.is_empty())
            }
            Some(Payload::Text(_)) => return Err(wrong_type(key)),
            None => (0, false),
        };
        // Like Redis, an emptied set disappears
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }
}
