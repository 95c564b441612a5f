//! Wire protocol tests for the HTTP backend

mod common;

#[cfg(test)]
mod tests {
    use super::common::setup_test_backend;
    use marketcache::{CacheConfig, CacheError, KeyValueStore, KvBackend};
    use mockito::Matcher;
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_sends_ttl() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.set",
                "payload": {
                    "key": "app:session",
                    "value": "\"token123\"",
                    "ttl": 3600
                }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "payload": {}}"#)
            .create_async()
            .await;

        backend
            .set("app:session", "\"token123\"".to_string(), 3600)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_store_applies_prefix_and_default_ttl() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.set",
                "payload": {
                    "key": "app:prod:user:1",
                    "value": r#"{"name":"Ana"}"#,
                    "ttl": 3600
                }
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {}}"#)
            .create_async()
            .await;

        let kv = KeyValueStore::new(Arc::new(backend), CacheConfig::new("app:prod:"));
        let res = kv.set("user:1", json!({"name": "Ana"}), None).await;
        assert!(res.success);
        assert_eq!(res.data, Some(json!({"name": "Ana"})));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_found() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.get",
                "payload": {"key": "app:user:1"}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": "{\"name\":\"Ana\"}"}"#)
            .create_async()
            .await;

        let value = backend.get("app:user:1").await.unwrap();
        assert_eq!(value, Some(Value::String(r#"{"name":"Ana"}"#.to_string())));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_not_found_is_miss() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({"command": "kv.get"})))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": null}"#)
            .create_async()
            .await;

        let kv = KeyValueStore::new(Arc::new(backend), CacheConfig::new("app:"));
        let res = kv.get::<String>("missing").await;
        assert!(res.success);
        assert_eq!(res.hit, Some(false));
        assert!(res.data.is_none());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_structured_payload_not_double_decoded() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"name": "Ana", "age": 31}}"#)
            .create_async()
            .await;

        let kv = KeyValueStore::new(Arc::new(backend), CacheConfig::new("app:"));
        let res = kv.get::<Value>("user:1").await;
        assert!(res.is_hit());
        assert_eq!(res.data, Some(json!({"name": "Ana", "age": 31})));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mdel_returns_count() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.mdel",
                "payload": {"keys": ["a", "b", "c"]}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"deleted": 2}}"#)
            .create_async()
            .await;

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(backend.del(&keys).await.unwrap(), 2);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_delete_skips_network() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .expect(0)
            .create_async()
            .await;

        assert_eq!(backend.del(&[]).await.unwrap(), 0);
        assert_eq!(backend.set_add("idx", &[]).await.unwrap(), 0);
        assert_eq!(backend.set_remove("idx", &[]).await.unwrap(), 0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exists_and_expire() {
        let (backend, mut server) = setup_test_backend().await;

        let exists = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.exists",
                "payload": {"key": "k"}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"exists": true}}"#)
            .create_async()
            .await;

        let expire = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.expire",
                "payload": {"key": "k", "ttl": 60}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"result": true}}"#)
            .create_async()
            .await;

        assert!(backend.exists("k").await.unwrap());
        assert!(backend.expire("k", 60).await.unwrap());

        exists.assert_async().await;
        expire.assert_async().await;
    }

    #[tokio::test]
    async fn test_ttl() {
        let (backend, mut server) = setup_test_backend().await;

        let with_ttl = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.ttl",
                "payload": {"key": "idx"}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"ttl": 42}}"#)
            .create_async()
            .await;

        let without_ttl = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.ttl",
                "payload": {"key": "forever"}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"ttl": null}}"#)
            .create_async()
            .await;

        assert_eq!(backend.ttl("idx").await.unwrap(), Some(42));
        assert_eq!(backend.ttl("forever").await.unwrap(), None);

        with_ttl.assert_async().await;
        without_ttl.assert_async().await;
    }

    #[tokio::test]
    async fn test_keys_filtered_client_side() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.keys",
                "payload": {"pattern": "app:geo:query:*"}
            })))
            .with_status(200)
            .with_body(
                r#"{"success": true, "payload": {"keys": ["app:geo:query:1", "app:merchant:location:m1", "app:geo:query:2"]}}"#,
            )
            .create_async()
            .await;

        let keys = backend.keys("app:geo:query:*").await.unwrap();
        assert_eq!(keys, vec!["app:geo:query:1", "app:geo:query:2"]);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_commands() {
        let (backend, mut server) = setup_test_backend().await;

        let add = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "set.add",
                "payload": {"key": "idx", "members": ["x", "y"]}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"added": 2}}"#)
            .create_async()
            .await;

        let members = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "set.members",
                "payload": {"key": "idx"}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"members": ["x", "y"]}}"#)
            .create_async()
            .await;

        let rem = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "set.rem",
                "payload": {"key": "idx", "members": ["x"]}
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"removed": 1}}"#)
            .create_async()
            .await;

        let both = vec!["x".to_string(), "y".to_string()];
        assert_eq!(backend.set_add("idx", &both).await.unwrap(), 2);
        assert_eq!(backend.set_members("idx").await.unwrap(), both);
        assert_eq!(backend.set_remove("idx", &["x".to_string()]).await.unwrap(), 1);

        add.assert_async().await;
        members.assert_async().await;
        rem.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(503)
            .with_body("store unavailable")
            .create_async()
            .await;

        let err = backend.get("k").await.unwrap_err();
        assert!(matches!(err, CacheError::ServerError(ref msg) if msg.contains("503")));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_command_failure_surfaces_as_result() {
        let (backend, mut server) = setup_test_backend().await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(200)
            .with_body(r#"{"success": false, "error": "out of memory"}"#)
            .create_async()
            .await;

        let kv = KeyValueStore::new(Arc::new(backend), CacheConfig::new("app:"));
        let res = kv.set("k", 1, None).await;
        assert!(!res.success);
        assert_eq!(res.error.as_deref(), Some("Server error: out of memory"));
        assert!(res.data.is_none());

        mock.assert_async().await;
    }
}
