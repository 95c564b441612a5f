//! HTTP backend speaking the command-envelope protocol

use super::{KvBackend, glob_match};
use crate::config::StoreConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

/// Remote key-value service reached over HTTP(S)
///
/// Every operation is a single request/response:
/// ```json
/// {
///   "command": "kv.get",
///   "request_id": "uuid",
///   "payload": { ... }
/// }
/// ```
/// There is no retry: a failed call surfaces as an error immediately.
#[derive(Clone)]
pub struct HttpBackend {
    http_client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a new backend client
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.endpoint_url)?;

        let mut http_client_builder = Client::builder().timeout(config.timeout());

        if let Some(ref token) = config.access_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("Bearer {}", token)
                .parse()
                .map_err(|_| CacheError::Config("access token is not a valid header value".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            http_client_builder = http_client_builder.default_headers(headers);
        }

        let http_client = http_client_builder.build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn send_command(&self, command: &str, payload: Value) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(command, request_id = %request_id, "sending store command");

        let body = json!({
            "command": command,
            "request_id": request_id,
            "payload": payload,
        });

        let url = self.base_url.join("api/v1/command")?;

        let response = self.http_client.post(url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CacheError::ServerError(format!("{}: {}", status, error_text)));
        }

        let result: Value = response.json().await?;

        if !result["success"].as_bool().unwrap_or(false) {
            let error_msg = result["error"]
                .as_str()
                .unwrap_or("Unknown error")
                .to_string();
            return Err(CacheError::ServerError(error_msg));
        }

        Ok(result["payload"].clone())
    }
}

fn string_list(response: &Value, field: &str) -> Result<Vec<String>> {
    match response.get(field) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone()).map_err(|e| {
            CacheError::InvalidResponse(format!("'{}' is not a list of strings: {}", field, e))
        }),
    }
}

fn count(response: &Value, field: &str) -> usize {
    response.get(field).and_then(|v| v.as_u64()).unwrap_or(0) as usize
}

#[async_trait]
impl KvBackend for HttpBackend {
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let payload = json!({
            "key": key,
            "value": value,
            "ttl": ttl_secs,
        });
        self.send_command("kv.set", payload).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let response = self.send_command("kv.get", json!({"key": key})).await?;

        // null payload means not found
        if response.is_null() {
            return Ok(None);
        }
        Ok(Some(response))
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let response = self.send_command("kv.mdel", json!({"keys": keys})).await?;
        Ok(count(&response, "deleted"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self.send_command("kv.exists", json!({"key": key})).await?;
        Ok(response["exists"].as_bool().unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let payload = json!({"key": key, "ttl": ttl_secs});
        let response = self.send_command("kv.expire", payload).await?;
        Ok(response["result"].as_bool().unwrap_or(false))
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let response = self.send_command("kv.ttl", json!({"key": key})).await?;
        Ok(response["ttl"].as_u64())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let response = self.send_command("kv.keys", json!({"pattern": pattern})).await?;
        let mut keys = string_list(&response, "keys")?;
        // Some servers ignore the pattern and return the whole keyspace
        keys.retain(|k| glob_match(pattern, k));
        Ok(keys)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let payload = json!({"key": key, "members": members});
        let response = self.send_command("set.add", payload).await?;
        Ok(count(&response, "added"))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let response = self.send_command("set.members", json!({"key": key})).await?;
        string_list(&response, "members")
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let payload = json!({"key": key, "members": members});
        let response = self.send_command("set.rem", payload).await?;
        Ok(count(&response, "removed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backend_creation() {
        let backend = HttpBackend::new(&StoreConfig::new("http://localhost:15500"));
        assert!(backend.is_ok());
    }

    #[test]
    fn test_backend_with_token() {
        let config = StoreConfig::new("https://kv.example.com")
            .with_access_token("secret-token-123")
            .with_timeout(Duration::from_secs(5));
        assert!(HttpBackend::new(&config).is_ok());
    }

    #[test]
    fn test_backend_invalid_url() {
        let backend = HttpBackend::new(&StoreConfig::new("not-a-valid-url"));
        assert!(matches!(backend, Err(CacheError::InvalidUrl(_))));
    }

    #[test]
    fn test_backend_rejects_token_with_newline() {
        let config = StoreConfig::new("http://localhost:15500").with_access_token("bad\ntoken");
        assert!(matches!(HttpBackend::new(&config), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_base_url_getter() {
        let backend = HttpBackend::new(&StoreConfig::new("http://localhost:15500")).unwrap();
        assert_eq!(backend.base_url().as_str(), "http://localhost:15500/");
    }
}
