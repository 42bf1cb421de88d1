//! HTTP backend for Synap-compatible key-value servers
//!
//! All commands use the StreamableHTTP envelope:
//! ```json
//! {
//!   "command": "kv.get",
//!   "request_id": "uuid",
//!   "payload": { ... }
//! }
//! ```
//! Values are base64-encoded so binary envelopes survive the JSON transport.

use super::backend::RemoteBackend;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection parameters for the remote store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Base URL of the server, e.g. `http://localhost:15500`
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Transport-level request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl ConnectionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Remote backend speaking the Synap command protocol
#[derive(Clone)]
pub struct HttpBackend {
    http_client: Client,
    command_url: Url,
}

impl HttpBackend {
    /// Build a client; malformed URLs or tokens fail here, not per request
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(CacheError::Config(format!(
                "remote base_url is not a base URL: {}",
                config.base_url
            )));
        }
        let command_url = base_url.join("api/v1/command")?;

        let mut builder = Client::builder().timeout(Duration::from_millis(config.timeout_ms));

        if let Some(ref token) = config.auth_token {
            let value: reqwest::header::HeaderValue =
                format!("Bearer {}", token).parse().map_err(|_| {
                    CacheError::Config("auth_token contains invalid header characters".to_string())
                })?;
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        Ok(Self {
            http_client: builder.build()?,
            command_url,
        })
    }

    pub fn command_url(&self) -> &Url {
        &self.command_url
    }

    async fn send_command(&self, command: &str, payload: Value) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let body = json!({
            "command": command,
            "request_id": request_id,
            "payload": payload,
        });

        debug!("Remote command {} (request_id={})", command, request_id);
        let response = self
            .http_client
            .post(self.command_url.clone())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CacheError::Remote(format!("{}: {}", status, error_text)));
        }

        let result: Value = response.json().await?;

        if !result["success"].as_bool().unwrap_or(false) {
            let error_msg = result["error"]
                .as_str()
                .unwrap_or("Unknown error")
                .to_string();
            return Err(CacheError::Remote(error_msg));
        }

        Ok(result["payload"].clone())
    }
}

/// Whole seconds for the wire, rounded up so sub-second TTLs don't become 0
fn ttl_secs(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis().div_ceil(1000))
        .unwrap_or(u64::MAX)
        .max(1)
}

/// The server JSON-encodes stored values before returning them as strings,
/// so a base64 value comes back quoted. Accept both shapes.
fn decode_value(value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| CacheError::Remote(format!("unexpected kv.get payload: {}", value)))?;
    let encoded = serde_json::from_str::<String>(text).unwrap_or_else(|_| text.to_string());
    Ok(BASE64.decode(encoded.as_bytes())?)
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn supports_expiry(&self) -> bool {
        true
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.send_command("kv.get", json!({ "key": key })).await?;

        // StreamableHTTP returns null for not found
        if response.is_null() {
            return Ok(None);
        }
        decode_value(&response).map(Some)
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let payload = json!({
            "key": key,
            "value": BASE64.encode(&value),
            "ttl": ttl.map(ttl_secs),
        });
        self.send_command("kv.set", payload).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let response = self.send_command("kv.del", json!({ "key": key })).await?;
        Ok(response["deleted"].as_bool().unwrap_or(false))
    }

    async fn clear(&self) -> Result<()> {
        self.send_command("kv.flushdb", json!({})).await?;
        Ok(())
    }
}
