//! HTTP client for the remote durable memory service.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Metadata, RemoteRecord, RemoteStats, APP_ID_KEY};

use super::{LtmConfig, RemoteMemory};

/// Resilient client for the remote memory service.
///
/// Retries non-2xx responses (except 404) and transport failures with
/// exponential backoff, then gives up quietly.
pub struct LtmClient {
    config: LtmConfig,
    client: reqwest::Client,
    ready: AtomicBool,
}

impl LtmClient {
    /// Build a client. It is not ready until [`RemoteMemory::initialize`] succeeds.
    pub fn new(config: LtmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &LtmConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a request, retrying retryable failures.
    ///
    /// `Ok(None)` means the service answered 404.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let attempts = self.config.max_retries.max(1);
        let mut last_err = Error::Other("no attempts made".into());

        for attempt in 0..attempts {
            match self.send_once(method.clone(), &url, query, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(
                        method = %method,
                        path = %path,
                        attempt = attempt + 1,
                        error = %e,
                        "LTM request failed"
                    );
                    last_err = e;
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        debug!("LTM request: {} {}", method, url);

        let mut req = self.client.request(method, url);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::remote(status.as_u16(), body));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn list(&self, user_id: &str, extra: &[(&str, String)], limit: usize) -> Vec<RemoteRecord> {
        if !self.is_ready() {
            return Vec::new();
        }
        let mut query = vec![
            ("user_id", user_id.to_string()),
            ("limit", limit.to_string()),
            ("state", "active".to_string()),
        ];
        query.extend(extra.iter().cloned());

        match self
            .request(reqwest::Method::GET, "/memories/", &query, None)
            .await
            .and_then(|v| parse_memories(v.unwrap_or(Value::Null)))
        {
            Ok(records) => records,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "LTM list failed");
                Vec::new()
            }
        }
    }
}

/// Extract `{memories: [...]}` (or a bare array) from a list response.
fn parse_memories(value: Value) -> Result<Vec<RemoteRecord>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("memories") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(Error::Serialization(format!(
                    "expected memories array, got {}",
                    other
                )));
            }
        },
        other => {
            return Err(Error::Serialization(format!(
                "unexpected list payload: {}",
                other
            )));
        }
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(Error::from))
        .collect()
}

/// Accept either a record or a `{results: [record, ..]}` envelope.
fn parse_created(value: Value) -> Result<RemoteRecord> {
    if let Some(first) = value
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
    {
        return Ok(serde_json::from_value(first.clone())?);
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl RemoteMemory for LtmClient {
    /// Check credentials and call `/health`.
    ///
    /// On failure the client stays not-ready and every operation becomes a
    /// no-op, so the caller may log the error and carry on.
    async fn initialize(&self) -> Result<()> {
        if !self.config.has_credentials() {
            self.ready.store(false, Ordering::SeqCst);
            return Err(Error::Config("LTM api_key is not configured".into()));
        }

        match self.request(reqwest::Method::GET, "/health", &[], None).await {
            Ok(Some(_)) => {
                self.ready.store(true, Ordering::SeqCst);
                tracing::info!(base_url = %self.config.base_url, "Long-term memory client ready");
                Ok(())
            }
            Ok(None) => Err(Error::NotFound("/health".into())),
            Err(e) => Err(e),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn upload(
        &self,
        content: &str,
        user_id: &str,
        app_id: &str,
        metadata: &Metadata,
    ) -> Option<RemoteRecord> {
        if !self.is_ready() {
            return None;
        }
        let mut metadata = metadata.clone();
        metadata.insert(APP_ID_KEY.to_string(), Value::String(app_id.to_string()));
        let body = json!({
            "messages": [{ "role": "user", "content": content }],
            "user_id": user_id,
            "metadata": metadata,
        });

        let result = self
            .request(reqwest::Method::POST, "/memories/", &[], Some(&body))
            .await
            .and_then(|v| match v {
                Some(v) => parse_created(v).map(Some),
                None => Ok(None),
            });
        match result {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "LTM upload failed");
                None
            }
        }
    }

    async fn search(&self, query: &str, user_id: &str, limit: usize) -> Vec<RemoteRecord> {
        self.list(user_id, &[("query", query.to_string())], limit).await
    }

    async fn get(&self, remote_id: &str, user_id: &str) -> Option<RemoteRecord> {
        if !self.is_ready() {
            return None;
        }
        let path = format!("/memories/{}", remote_id);
        let query = [("user_id", user_id.to_string())];
        let result = self
            .request(reqwest::Method::GET, &path, &query, None)
            .await
            .and_then(|v| match v {
                Some(v) => Ok(Some(serde_json::from_value(v)?)),
                None => Ok(None),
            });
        match result {
            Ok(record) => record,
            Err(e) => {
                warn!(remote_id = %remote_id, error = %e, "LTM get failed");
                None
            }
        }
    }

    async fn delete(&self, remote_id: &str, user_id: &str) -> bool {
        if !self.is_ready() {
            return false;
        }
        let path = format!("/memories/{}", remote_id);
        let query = [("user_id", user_id.to_string())];
        match self.request(reqwest::Method::DELETE, &path, &query, None).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(remote_id = %remote_id, error = %e, "LTM delete failed");
                false
            }
        }
    }

    async fn hot_records(&self, user_id: &str, limit: usize) -> Vec<RemoteRecord> {
        self.list(user_id, &[("sort", "hot".to_string())], limit).await
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Vec<RemoteRecord> {
        self.list(user_id, &[("sort", "recent".to_string())], limit).await
    }

    async fn stats(&self, user_id: Option<&str>) -> Option<RemoteStats> {
        if !self.is_ready() {
            return None;
        }
        let query: Vec<(&str, String)> = user_id
            .map(|u| vec![("user_id", u.to_string())])
            .unwrap_or_default();
        let result = self
            .request(reqwest::Method::GET, "/memories/stats", &query, None)
            .await
            .and_then(|v| match v {
                Some(v) => Ok(Some(serde_json::from_value(v)?)),
                None => Ok(None),
            });
        match result {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "LTM stats failed");
                None
            }
        }
    }
}
