//! Common test utilities

use async_trait::async_trait;
use marketcache::{
    CacheConfig, CacheError, CacheManager, HttpBackend, KeyValueStore, KvBackend, MemoryBackend,
    Result, StoreConfig,
};
use mockito::{Server, ServerGuard};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Create a mock store server for testing
#[allow(dead_code)] // Used by other test modules
pub async fn create_mock_server() -> ServerGuard {
    Server::new_async().await
}

/// Setup an HTTP backend pointing to a mock server
#[allow(dead_code)] // Used by other test modules
pub async fn setup_test_backend() -> (HttpBackend, ServerGuard) {
    let server = create_mock_server().await;
    let config = StoreConfig::new(server.url()).with_timeout(std::time::Duration::from_secs(5));
    let backend = HttpBackend::new(&config).unwrap();
    (backend, server)
}

/// Key-value store over a fresh in-memory backend
#[allow(dead_code)] // Used by other test modules
pub fn memory_store(prefix: &str) -> KeyValueStore {
    KeyValueStore::new(Arc::new(MemoryBackend::new()), CacheConfig::new(prefix))
}

/// Cache manager over a fresh in-memory backend
#[allow(dead_code)] // Used by other test modules
pub fn memory_manager() -> (CacheManager, MemoryBackend) {
    let backend = MemoryBackend::new();
    let manager = CacheManager::with_backend(CacheConfig::new("test:"), Arc::new(backend.clone()));
    (manager, backend)
}

/// In-memory backend whose `del` fails once a budget of calls is used up
#[allow(dead_code)] // Used by other test modules
#[derive(Clone)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    del_budget: Arc<AtomicUsize>,
}

#[allow(dead_code)] // Used by other test modules
impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            del_budget: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    /// Let `calls` more `del` calls through, then fail every one after
    pub fn fail_after(&self, calls: usize) {
        self.del_budget.store(calls, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_after(usize::MAX);
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }
}

#[async_trait]
impl KvBackend for FlakyBackend {
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        self.inner.set(key, value, ttl_secs).await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        let allowed = self
            .del_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(CacheError::ServerError("connection reset".to_string()));
        }
        self.inner.del(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.inner.expire(key, ttl_secs).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize> {
        self.inner.set_add(key, members).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.inner.set_members(key).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize> {
        self.inner.set_remove(key, members).await
    }
}

/// Cache manager over a [`FlakyBackend`] that starts out healthy
#[allow(dead_code)] // Used by other test modules
pub fn flaky_manager() -> (CacheManager, FlakyBackend) {
    let backend = FlakyBackend::new();
    let manager = CacheManager::with_backend(CacheConfig::new("test:"), Arc::new(backend.clone()));
    (manager, backend)
}
