//! Bulk invalidation when the store fails partway through

mod common;

#[cfg(test)]
mod tests {
    use super::common::flaky_manager;
    use marketcache::KvBackend;
    use marketcache::document::MERCHANTS;
    use serde_json::{Value, json};

    async fn merchant_keys(backend: &impl KvBackend) -> usize {
        backend
            .keys("test:payload:collection:merchants:*")
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_clear_reports_confirmed_deletions() {
        let (cache, backend) = flaky_manager();
        for i in 0..250 {
            let key = format!("session:{:03}", i);
            assert!(cache.kv().set(&key, json!({"n": i}), None).await.success);
        }

        // First batch of 100 goes through, the second fails
        backend.fail_after(1);
        let res = cache.kv().clear().await;
        assert!(!res.success);
        assert_eq!(res.data, Some(100));
        assert!(res.error.is_some());
        assert_eq!(backend.inner().len(), 150);

        let mut cached = 0;
        for i in 0..250 {
            if cache.kv().get::<Value>(&format!("session:{:03}", i)).await.is_hit() {
                cached += 1;
            }
        }
        assert_eq!(cached, 150);

        // Repeating after recovery finishes the job without resurrecting anything
        backend.heal();
        let res = cache.kv().clear().await;
        assert!(res.success);
        assert_eq!(res.data, Some(150));
        assert!(backend.inner().is_empty());
    }

    #[tokio::test]
    async fn test_first_batch_failure_deletes_nothing() {
        let (cache, backend) = flaky_manager();
        for i in 0..10 {
            cache.kv().set(&format!("k{}", i), i, None).await;
        }

        backend.fail_after(0);
        let res = cache.kv().clear().await;
        assert!(!res.success);
        assert_eq!(res.data, None);
        assert_eq!(backend.inner().len(), 10);
    }

    #[tokio::test]
    async fn test_invalidate_collection_reports_confirmed_deletions() {
        let (cache, backend) = flaky_manager();
        let docs = cache.documents();
        for i in 0..150 {
            let id = i.to_string();
            assert!(docs.cache_merchant(&id, &json!({"name": id}), None).await.success);
        }
        assert_eq!(merchant_keys(&backend).await, 150);

        backend.fail_after(1);
        let res = docs.invalidate_collection(MERCHANTS).await;
        assert!(!res.success);
        assert_eq!(res.data, Some(100));
        assert_eq!(merchant_keys(&backend).await, 50);

        let mut cached = 0;
        for i in 0..150 {
            if docs.get_merchant::<Value>(&i.to_string()).await.is_hit() {
                cached += 1;
            }
        }
        assert_eq!(cached, 50);

        backend.heal();
        let res = docs.invalidate_collection(MERCHANTS).await;
        assert!(res.success);
        assert_eq!(res.data, Some(50));
        assert_eq!(merchant_keys(&backend).await, 0);
    }

    #[tokio::test]
    async fn test_address_cascade_counts_address_before_failure() {
        let (cache, backend) = flaky_manager();
        let docs = cache.documents();
        docs.cache_address("a1", &json!({"street": "Roxas Blvd"}), None).await;
        docs.cache_merchant("m1", &json!({"name": "Lola's"}), None).await;

        // The address delete succeeds, the merchant sweep does not
        backend.fail_after(1);
        let res = docs.invalidate_address_caches("a1").await;
        assert!(!res.success);
        assert_eq!(res.data, Some(1));
        assert!(!docs.get_address::<Value>("a1").await.is_hit());
        assert!(docs.get_merchant::<Value>("m1").await.is_hit());
    }
}
