//! Backing store abstraction
//!
//! The cache components only ever talk to an `Arc<dyn KvBackend>`. Keys seen
//! here are physical keys: namespacing happens one layer up in
//! [`KeyValueStore`](crate::KeyValueStore).

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// A networked key-value service with expiring keys, key-pattern enumeration
/// and unordered string sets.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// `SET key value EX ttl`; `value` is JSON text
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;

    /// `GET key`; `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// `DEL key...`; returns how many keys were actually removed
    async fn del(&self, keys: &[String]) -> Result<usize>;

    /// `EXISTS key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// `EXPIRE key ttl`; false when the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// `TTL key`; remaining seconds, `None` when the key is absent or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    /// `KEYS pattern` with `*` and `?` wildcards
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// `SADD key member...`; returns how many members were new
    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize>;

    /// `SMEMBERS key`
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// `SREM key member...`; returns how many members were removed
    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize>;
}

/// Glob match supporting `*` (any run) and `?` (any single char)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_ti = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last star swallow one more char
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Literal part of a pattern before its first wildcard
pub(crate) fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}
