//! Long-term memory (LTM).
//!
//! The remote durable memory service is reached through [`RemoteMemory`].
//! Every operation collapses terminal failures to `None`, an empty list or
//! `false`, so callers never see transport errors and a record that failed
//! to upload simply stays pending.
//!
//! # Usage
//!
//! ```rust,no_run
//! use memshuttle_core::ltm::{LtmClient, LtmConfig, RemoteMemory};
//!
//! #[tokio::main]
//! async fn main() -> memshuttle_core::Result<()> {
//!     let client = LtmClient::new(LtmConfig::default().with_api_key("secret"))?;
//!     client.initialize().await?;
//!     let hot = client.hot_records("alice", 20).await;
//!     println!("{} hot records", hot.len());
//!     Ok(())
//! }
//! ```

#[cfg(feature = "client")]
mod client;

#[cfg(feature = "client")]
pub use client::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::types::{Metadata, RemoteRecord, RemoteStats};

/// Number of recent remote records consulted before an upload batch.
pub const RECENT_WINDOW: usize = 50;

/// Remote durable memory service.
#[async_trait]
pub trait RemoteMemory: Send + Sync {
    /// Verify credentials and reachability. Clients that need no setup are
    /// always ready.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the client finished initialization. When false every other
    /// call is a no-op.
    fn is_ready(&self) -> bool;

    async fn upload(
        &self,
        content: &str,
        user_id: &str,
        app_id: &str,
        metadata: &Metadata,
    ) -> Option<RemoteRecord>;

    async fn search(&self, query: &str, user_id: &str, limit: usize) -> Vec<RemoteRecord>;

    async fn get(&self, remote_id: &str, user_id: &str) -> Option<RemoteRecord>;

    async fn delete(&self, remote_id: &str, user_id: &str) -> bool;

    /// Records the service ranks as worth caching locally.
    async fn hot_records(&self, user_id: &str, limit: usize) -> Vec<RemoteRecord>;

    /// Most recently written records for a user.
    async fn recent(&self, user_id: &str, limit: usize) -> Vec<RemoteRecord>;

    async fn stats(&self, user_id: Option<&str>) -> Option<RemoteStats>;
}

/// Connection and retry settings for the LTM client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LtmConfig {
    /// Service root, without a trailing slash (default: http://127.0.0.1:8000)
    pub base_url: String,
    /// Bearer credential; the client stays not-ready without one.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Attempts per call, including the first (default: 3)
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `base * 2^n` (default: 1000ms)
    pub retry_base_delay_ms: u64,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: None,
            timeout_seconds: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl LtmConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Whether usable credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Delay before retrying after failed attempt `attempt` (zero-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}
