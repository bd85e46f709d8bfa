//! Memory Engine
//!
//! Ties the short-term store, the remote client and the shuttle together
//! behind one handle.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use memshuttle_core::stm::SearchHit;
use memshuttle_core::{
    Metadata, Record, RecordState, RemoteMemory, RemoteRecord, RemoteStats, StmStats, StmStore,
};

#[cfg(feature = "client")]
use crate::config::EngineConfig;
use crate::config::ShuttleConfig;
use crate::shuttle::{ShuttleOrchestrator, ShuttleStats, UploadReport};
use crate::{SDKError, SDKResult};

/// Decides whether a piece of content is worth storing at all.
pub trait MemoryClassifier: Send + Sync {
    fn should_remember(&self, content: &str) -> bool;
}

/// Classifier that keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRemember;

impl MemoryClassifier for AlwaysRemember {
    fn should_remember(&self, _content: &str) -> bool {
        true
    }
}

/// Local hits first, then remote records not already held locally.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recall {
    pub local: Vec<SearchHit>,
    pub remote: Vec<RemoteRecord>,
}

/// Combined engine statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub stm: StmStats,
    pub shuttle: ShuttleStats,
    pub ltm_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteStats>,
}

/// Two-tier memory engine
///
/// # Example
///
/// ```rust,no_run
/// use memshuttle_sdk::{EngineConfig, MemoryEngine};
///
/// async fn example() -> anyhow::Result<()> {
///     let engine = MemoryEngine::new(EngineConfig::default())?;
///     engine.initialize().await;
///     engine.start().await;
///
///     engine.remember("Prefers green tea", "alice", "chat", Default::default())?;
///     let recall = engine.recall("tea", "alice", 5).await?;
///
///     engine.stop().await;
///     Ok(())
/// }
/// ```
pub struct MemoryEngine {
    stm: Arc<StmStore>,
    ltm: Arc<dyn RemoteMemory>,
    shuttle: ShuttleOrchestrator,
    classifier: Arc<dyn MemoryClassifier>,
}

impl MemoryEngine {
    /// Build an engine backed by the HTTP long-term memory client
    #[cfg(feature = "client")]
    pub fn new(config: EngineConfig) -> SDKResult<Self> {
        config.validate()?;
        let stm = Arc::new(StmStore::new(config.stm.clone()));
        let ltm = Arc::new(memshuttle_core::LtmClient::new(config.ltm.clone())?);
        Self::with_components(config.shuttle, stm, ltm)
    }

    /// Build an engine from existing components
    pub fn with_components(
        shuttle_config: ShuttleConfig,
        stm: Arc<StmStore>,
        ltm: Arc<dyn RemoteMemory>,
    ) -> SDKResult<Self> {
        let shuttle = ShuttleOrchestrator::new(shuttle_config, Arc::clone(&stm), Arc::clone(&ltm))?;
        Ok(Self {
            stm,
            ltm,
            shuttle,
            classifier: Arc::new(AlwaysRemember),
        })
    }

    /// Set the classifier consulted by `remember`
    pub fn with_classifier(mut self, classifier: Arc<dyn MemoryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Initialize the remote client.
    ///
    /// Returns whether the remote tier is available. When it is not, the
    /// engine keeps working on the short-term store alone.
    pub async fn initialize(&self) -> bool {
        match self.ltm.initialize().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Long-term memory unavailable, running short-term only");
                false
            }
        }
    }

    pub async fn start(&self) {
        self.shuttle.start().await;
    }

    pub async fn stop(&self) {
        self.shuttle.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.shuttle.is_running()
    }

    pub fn stm(&self) -> &Arc<StmStore> {
        &self.stm
    }

    pub fn ltm(&self) -> &Arc<dyn RemoteMemory> {
        &self.ltm
    }

    pub fn shuttle(&self) -> &ShuttleOrchestrator {
        &self.shuttle
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memory operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store content and queue it for upload.
    ///
    /// Returns `None` when the classifier declines the content.
    pub fn remember(
        &self,
        content: &str,
        user_id: &str,
        app_id: &str,
        metadata: Metadata,
    ) -> SDKResult<Option<Record>> {
        if content.trim().is_empty() {
            return Err(SDKError::invalid_operation("content must not be empty"));
        }
        if user_id.is_empty() {
            return Err(SDKError::invalid_operation("user_id is required"));
        }
        if !self.classifier.should_remember(content) {
            debug!(user_id = %user_id, "Classifier declined content");
            return Ok(None);
        }

        let record = self.stm.add(content, user_id, app_id, metadata)?;
        self.shuttle.enqueue(user_id, &record.id)?;
        Ok(Some(record))
    }

    /// Fetch a local record, counting the read
    pub fn get(&self, id: &str) -> SDKResult<Option<Record>> {
        Ok(self.stm.get(id)?)
    }

    /// Search locally, then top up from the remote service when local hits
    /// fall short of `limit`.
    pub async fn recall(&self, query: &str, user_id: &str, limit: usize) -> SDKResult<Recall> {
        let local = self.stm.search(query, user_id, limit).await?;
        let mut remote = Vec::new();

        if local.len() < limit && self.ltm.is_ready() {
            let seen: HashSet<&str> = local.iter().map(|h| h.record.content.as_str()).collect();
            remote = self
                .ltm
                .search(query, user_id, limit)
                .await
                .into_iter()
                .filter(|r| !seen.contains(r.content.as_str()))
                .take(limit - local.len())
                .collect();
        }

        Ok(Recall { local, remote })
    }

    /// Delete a record locally and, once uploaded, remotely as well.
    ///
    /// Returns whether the record existed locally.
    pub async fn forget(&self, id: &str) -> SDKResult<bool> {
        let Some(record) = self.stm.peek(id)? else {
            return Ok(false);
        };
        let deleted = self.stm.delete(id)?;

        if let Some(remote_id) = record.remote_id() {
            if self.ltm.is_ready() && !self.ltm.delete(remote_id, &record.user_id).await {
                warn!(record_id = %id, remote_id = %remote_id, "Remote delete did not succeed");
            }
        }
        info!(record_id = %id, user_id = %record.user_id, "Forgot record");
        Ok(deleted)
    }

    /// A user's active records, newest first
    pub fn list(&self, user_id: &str, limit: usize) -> SDKResult<Vec<Record>> {
        Ok(self.stm.list_by_user(user_id, limit, Some(RecordState::Active))?)
    }

    /// Upload a user's pending records now
    pub async fn flush(&self, user_id: &str) -> UploadReport {
        self.shuttle.force_upload(user_id).await
    }

    /// Store, shuttle and (when available) remote statistics
    pub async fn stats(&self, user_id: Option<&str>) -> SDKResult<EngineStats> {
        let ltm_ready = self.ltm.is_ready();
        let remote = if ltm_ready {
            self.ltm.stats(user_id).await
        } else {
            None
        };
        Ok(EngineStats {
            stm: self.stm.stats()?,
            shuttle: self.shuttle.stats(user_id)?,
            ltm_ready,
            remote,
        })
    }
}

#[cfg(all(test, feature = "client"))]
mod tests {
    use super::*;
    use memshuttle_core::{LtmConfig, UploadStatus};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine_with_server(server: &MockServer) -> MemoryEngine {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;

        let config = EngineConfig::default().with_ltm(
            LtmConfig::default()
                .with_base_url(server.uri())
                .with_api_key("test-key")
                .with_retry_base_delay(Duration::from_millis(10)),
        );
        let engine = MemoryEngine::new(config).unwrap();
        assert!(engine.initialize().await);
        engine
    }

    struct LongerThan(usize);

    impl MemoryClassifier for LongerThan {
        fn should_remember(&self, content: &str) -> bool {
            content.len() > self.0
        }
    }

    #[tokio::test]
    async fn test_remember_and_flush_round_trip() {
        let server = MockServer::start().await;
        let engine = engine_with_server(&server).await;

        Mock::given(method("GET"))
            .and(path("/memories/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"memories": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/memories/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "m-1", "memory": "likes tea"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let record = engine
            .remember("likes tea", "u1", "chat", Metadata::new())
            .unwrap()
            .unwrap();
        assert_eq!(engine.shuttle().pending_count("u1").unwrap(), 1);

        let report = engine.flush("u1").await;
        assert_eq!(report.uploaded, 1);

        let stored = engine.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.upload_status, UploadStatus::Uploaded);
        assert_eq!(stored.remote_id(), Some("m-1"));
    }

    #[tokio::test]
    async fn test_forget_deletes_remote_copy() {
        let server = MockServer::start().await;
        let engine = engine_with_server(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/memories/m-7"))
            .and(query_param("user_id", "u1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let record = engine
            .remember("likes tea", "u1", "chat", Metadata::new())
            .unwrap()
            .unwrap();
        engine.stm().mark_uploaded(&record.id, "m-7").unwrap();

        assert!(engine.forget(&record.id).await.unwrap());
        assert!(engine.get(&record.id).unwrap().is_none());
        assert!(!engine.forget(&record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_recall_tops_up_from_remote() {
        let server = MockServer::start().await;
        let engine = engine_with_server(&server).await;

        Mock::given(method("GET"))
            .and(path("/memories/"))
            .and(query_param("query", "tea"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "memories": [
                    {"id": "m-5", "memory": "likes green tea"},
                    {"id": "m-6", "memory": "tea ceremony in Kyoto"}
                ]
            })))
            .mount(&server)
            .await;

        engine
            .remember("likes green tea", "u1", "chat", Metadata::new())
            .unwrap();

        let recall = engine.recall("tea", "u1", 5).await.unwrap();
        assert_eq!(recall.local.len(), 1);
        assert_eq!(recall.remote.len(), 1);
        assert_eq!(recall.remote[0].id, "m-6");
    }

    #[tokio::test]
    async fn test_runs_without_long_term_memory() {
        let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
        assert!(!engine.initialize().await);

        let record = engine
            .remember("likes tea", "u1", "chat", Metadata::new())
            .unwrap()
            .unwrap();
        let report = engine.flush("u1").await;
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(
            engine.get(&record.id).unwrap().unwrap().upload_status,
            UploadStatus::Pending
        );

        let stats = engine.stats(Some("u1")).await.unwrap();
        assert!(!stats.ltm_ready);
        assert_eq!(stats.stm.pending, 1);
        assert_eq!(stats.shuttle.user.unwrap().pending_uploads, 1);
    }

    #[tokio::test]
    async fn test_classifier_and_validation() {
        let engine = MemoryEngine::new(EngineConfig::default())
            .unwrap()
            .with_classifier(Arc::new(LongerThan(3)));

        assert!(engine.remember("ok", "u1", "chat", Metadata::new()).unwrap().is_none());
        let kept = tokio_test::assert_ok!(engine.remember("long enough", "u1", "chat", Metadata::new()));
        assert!(kept.is_some());
        assert!(engine.remember("   ", "u1", "chat", Metadata::new()).is_err());
        assert_eq!(engine.list("u1", 10).unwrap().len(), 1);
    }
}
