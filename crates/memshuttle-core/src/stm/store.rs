//! In-memory short-term store.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Metadata, Record, RecordState, StmStats, UploadStatus, REMOTE_ID_KEY};

use super::backends::{best_effort, GraphNode, GraphStore, SideStoreOutcome, SimilarityBackend};
use super::{ResourceGovernor, SalienceScorer, StmConfig};

/// Metadata key carrying the local record id to the similarity backend.
const RECORD_ID_KEY: &str = "stm_id";

/// A search hit re-hydrated into a local record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub record: Record,
    /// Backend similarity score; `None` for the local substring fallback.
    pub score: Option<f64>,
}

/// One user's records. Guarded by its own lock.
#[derive(Debug, Default)]
struct UserShard {
    records: HashMap<String, Record>,
    /// Record ids in creation order (oldest first).
    order: Vec<String>,
}

impl UserShard {
    fn live(&self) -> Vec<&Record> {
        self.order.iter().filter_map(|id| self.records.get(id)).collect()
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        let record = self.records.remove(id)?;
        self.order.retain(|other| other != id);
        Some(record)
    }

    fn find_by_content(&mut self, content: &str) -> Option<&mut Record> {
        let id = self
            .order
            .iter()
            .rev()
            .find(|id| self.records.get(*id).is_some_and(|r| r.content == content))?
            .clone();
        self.records.get_mut(&id)
    }
}

/// Global usage counters. Updated only while the affected user's shard is locked.
#[derive(Debug, Default)]
struct Budget {
    count: usize,
    bytes: usize,
}

/// Bounded, indexed, in-memory record collection.
///
/// Every user has its own shard lock, so writers for different users never
/// contend; the budget lock is only held for the eviction decision. Lock
/// order is always shard → budget → index.
pub struct StmStore {
    governor: ResourceGovernor,
    scorer: SalienceScorer,
    shards: RwLock<HashMap<String, Arc<Mutex<UserShard>>>>,
    index: RwLock<HashMap<String, String>>,
    budget: Mutex<Budget>,
    evictions: AtomicU64,
    seq: AtomicU64,
    similarity: Option<Arc<dyn SimilarityBackend>>,
    graph: Option<Arc<dyn GraphStore>>,
}

impl StmStore {
    /// Create a store with no side stores attached.
    pub fn new(config: StmConfig) -> Self {
        Self {
            governor: ResourceGovernor::new(&config),
            scorer: SalienceScorer::default(),
            shards: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            budget: Mutex::new(Budget::default()),
            evictions: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            similarity: None,
            graph: None,
        }
    }

    /// Attach a similarity backend used by `search` and indexed on `add`.
    pub fn with_similarity(mut self, backend: Arc<dyn SimilarityBackend>) -> Self {
        self.similarity = Some(backend);
        self
    }

    /// Attach a graph store that mirrors adds and deletes.
    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn scorer(&self) -> &SalienceScorer {
        &self.scorer
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shard helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn shard(&self, user_id: &str) -> Result<Option<Arc<Mutex<UserShard>>>> {
        let shards = self.shards.read().map_err(|_| Error::LockPoisoned)?;
        Ok(shards.get(user_id).cloned())
    }

    fn shard_or_create(&self, user_id: &str) -> Result<Arc<Mutex<UserShard>>> {
        if let Some(shard) = self.shard(user_id)? {
            return Ok(shard);
        }
        let mut shards = self.shards.write().map_err(|_| Error::LockPoisoned)?;
        Ok(shards.entry(user_id.to_string()).or_default().clone())
    }

    fn owner_of(&self, id: &str) -> Result<Option<String>> {
        let index = self.index.read().map_err(|_| Error::LockPoisoned)?;
        Ok(index.get(id).cloned())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Record operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new pending record and enforce the budget.
    ///
    /// The returned record may already have been evicted if its owner is
    /// the only user holding records in a full store.
    pub fn add(
        &self,
        content: &str,
        user_id: &str,
        app_id: &str,
        metadata: Metadata,
    ) -> Result<Record> {
        let id = format!("{}_{}", user_id, Uuid::new_v4().simple());
        let mut record = Record::new(
            id.clone(),
            content.to_string(),
            user_id.to_string(),
            app_id.to_string(),
            metadata,
            Utc::now(),
        );
        record.seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard_or_create(user_id)?;
        let evicted = {
            let mut shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
            shard.order.push(id.clone());
            shard.records.insert(id.clone(), record.clone());

            let mut budget = self.budget.lock().map_err(|_| Error::LockPoisoned)?;
            budget.count += 1;
            budget.bytes += record.size_bytes();

            let victims =
                self.governor
                    .select_victims(&shard.live(), budget.count, budget.bytes);
            let mut evicted = Vec::with_capacity(victims.len());
            for victim in victims {
                if let Some(mut removed) = shard.remove(&victim) {
                    removed.state = RecordState::Deleted;
                    budget.count -= 1;
                    budget.bytes -= removed.size_bytes();
                    evicted.push(removed);
                }
            }
            drop(budget);

            let mut index = self.index.write().map_err(|_| Error::LockPoisoned)?;
            index.insert(id.clone(), user_id.to_string());
            for removed in &evicted {
                index.remove(&removed.id);
            }
            evicted
        };

        let mut self_evicted = false;
        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            tracing::info!(
                user_id = %user_id,
                evicted = evicted.len(),
                "Evicted least-recently-used records"
            );
            for removed in &evicted {
                if removed.id == id {
                    self_evicted = true;
                } else {
                    self.spawn_graph_delete(&removed.id);
                }
            }
        }

        // A record evicted by its own insert never reaches the side stores.
        if self_evicted {
            tracing::debug!(record_id = %id, user_id = %user_id, "New record evicted on insert");
        } else {
            tracing::debug!(record_id = %id, user_id = %user_id, "Stored short-term record");
            self.spawn_side_writes(&record);
        }
        Ok(record)
    }

    /// Fetch a record by id, counting it as an access.
    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        let Some(user_id) = self.owner_of(id)? else {
            return Ok(None);
        };
        let Some(shard) = self.shard(&user_id)? else {
            return Ok(None);
        };
        let mut shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(shard.records.get_mut(id).map(|record| {
            record.touch(Utc::now());
            record.clone()
        }))
    }

    /// Fetch a record without touching its access tracking.
    pub fn peek(&self, id: &str) -> Result<Option<Record>> {
        let Some(user_id) = self.owner_of(id)? else {
            return Ok(None);
        };
        let Some(shard) = self.shard(&user_id)? else {
            return Ok(None);
        };
        let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(shard.records.get(id).cloned())
    }

    /// Remove a record from every index. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let Some(user_id) = self.owner_of(id)? else {
            return Ok(false);
        };
        let Some(shard) = self.shard(&user_id)? else {
            return Ok(false);
        };

        let removed = {
            let mut shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
            let Some(mut removed) = shard.remove(id) else {
                return Ok(false);
            };
            removed.state = RecordState::Deleted;

            let mut budget = self.budget.lock().map_err(|_| Error::LockPoisoned)?;
            budget.count -= 1;
            budget.bytes -= removed.size_bytes();
            drop(budget);

            let mut index = self.index.write().map_err(|_| Error::LockPoisoned)?;
            index.remove(id);
            removed
        };

        tracing::debug!(record_id = %removed.id, user_id = %user_id, "Deleted short-term record");
        self.spawn_graph_delete(id);
        Ok(true)
    }

    /// A user's records, most recently created first.
    pub fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        state: Option<RecordState>,
    ) -> Result<Vec<Record>> {
        let Some(shard) = self.shard(user_id)? else {
            return Ok(Vec::new());
        };
        let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(shard
            .live()
            .into_iter()
            .rev()
            .filter(|r| state.is_none_or(|s| r.state == s))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Pending, active records scored now and sorted by descending salience.
    pub fn upload_candidates(&self, user_id: &str, limit: usize) -> Result<Vec<Record>> {
        let Some(shard) = self.shard(user_id)? else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        let mut candidates: Vec<Record> = {
            let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
            shard
                .live()
                .into_iter()
                .filter(|r| r.is_upload_candidate())
                .cloned()
                .collect()
        };
        for record in &mut candidates {
            record.salience_score = self.scorer.score_at(record, now);
        }
        candidates.sort_by(|a, b| {
            b.salience_score
                .partial_cmp(&a.salience_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Mark a record as accepted by the remote service. Idempotent.
    ///
    /// Returns whether the record exists locally.
    pub fn mark_uploaded(&self, id: &str, remote_id: &str) -> Result<bool> {
        let Some(user_id) = self.owner_of(id)? else {
            return Ok(false);
        };
        let Some(shard) = self.shard(&user_id)? else {
            return Ok(false);
        };
        let mut shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        let Some(record) = shard.records.get_mut(id) else {
            return Ok(false);
        };
        record.upload_status = UploadStatus::Uploaded;
        record
            .metadata
            .insert(REMOTE_ID_KEY.to_string(), serde_json::Value::String(remote_id.to_string()));
        Ok(true)
    }

    /// Search a user's records.
    ///
    /// Delegates ranking to the similarity backend when one is attached and
    /// re-hydrates matches that still exist locally; otherwise falls back to
    /// a case-insensitive substring scan, newest first. Every hit counts as
    /// an access.
    pub async fn search(&self, query: &str, user_id: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let matches = match &self.similarity {
            Some(backend) => match backend.search(query, user_id, limit).await {
                Ok(matches) => Some(matches),
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "Similarity search failed, falling back to local scan"
                    );
                    None
                }
            },
            None => None,
        };

        let Some(shard) = self.shard(user_id)? else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        let mut shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        match matches {
            Some(matches) => {
                for m in matches {
                    if hits.len() >= limit {
                        break;
                    }
                    let by_id = m
                        .record_id
                        .as_deref()
                        .filter(|id| shard.records.contains_key(*id))
                        .map(str::to_string);
                    let record = match by_id {
                        Some(id) => shard.records.get_mut(&id),
                        None => shard.find_by_content(&m.content),
                    };
                    if let Some(record) = record {
                        if seen.insert(record.id.clone()) {
                            record.touch(now);
                            hits.push(SearchHit {
                                record: record.clone(),
                                score: Some(m.score),
                            });
                        }
                    }
                }
            }
            None => {
                let needle = query.to_lowercase();
                let ids: Vec<String> = shard
                    .order
                    .iter()
                    .rev()
                    .filter(|id| {
                        shard
                            .records
                            .get(*id)
                            .is_some_and(|r| r.content.to_lowercase().contains(&needle))
                    })
                    .take(limit)
                    .cloned()
                    .collect();
                for id in ids {
                    if let Some(record) = shard.records.get_mut(&id) {
                        record.touch(now);
                        hits.push(SearchHit {
                            record: record.clone(),
                            score: None,
                        });
                    }
                }
            }
        }

        Ok(hits)
    }

    /// Query the graph store for entities related to a user's query.
    ///
    /// Empty when no graph store is attached or the call fails.
    pub async fn related(&self, user_id: &str, query: &str, limit: usize) -> Vec<GraphNode> {
        let Some(graph) = &self.graph else {
            return Vec::new();
        };
        match graph.search_by_user(user_id, query, limit).await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Graph search failed");
                Vec::new()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Users that have ever written to the store.
    pub fn users(&self) -> Result<Vec<String>> {
        let shards = self.shards.read().map_err(|_| Error::LockPoisoned)?;
        let mut users: Vec<String> = shards.keys().cloned().collect();
        users.sort();
        Ok(users)
    }

    /// Total live records across all users.
    pub fn count(&self) -> Result<usize> {
        let budget = self.budget.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(budget.count)
    }

    /// Exact content strings currently held for a user.
    pub fn contents_for_user(&self, user_id: &str) -> Result<HashSet<String>> {
        let Some(shard) = self.shard(user_id)? else {
            return Ok(HashSet::new());
        };
        let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(shard.records.values().map(|r| r.content.clone()).collect())
    }

    /// Whether a user already holds a record with exactly this content.
    pub fn contains_content(&self, user_id: &str, content: &str) -> Result<bool> {
        let Some(shard) = self.shard(user_id)? else {
            return Ok(false);
        };
        let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(shard.records.values().any(|r| r.content == content))
    }

    /// Usage snapshot.
    pub fn stats(&self) -> Result<StmStats> {
        let shards: Vec<Arc<Mutex<UserShard>>> = {
            let shards = self.shards.read().map_err(|_| Error::LockPoisoned)?;
            shards.values().cloned().collect()
        };

        let mut stats = StmStats {
            users: shards.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            max_memories: self.governor.max_memories(),
            ..Default::default()
        };
        for shard in shards {
            let shard = shard.lock().map_err(|_| Error::LockPoisoned)?;
            for record in shard.records.values() {
                stats.total_records += 1;
                stats.total_bytes += record.size_bytes();
                match record.upload_status {
                    UploadStatus::Pending => stats.pending += 1,
                    UploadStatus::Uploaded => stats.uploaded += 1,
                    UploadStatus::Failed => stats.failed += 1,
                }
            }
        }
        Ok(stats)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Side stores
    // ─────────────────────────────────────────────────────────────────────────

    /// Index a record into the similarity backend and graph store.
    pub async fn write_side_stores(&self, record: &Record) -> (SideStoreOutcome, SideStoreOutcome) {
        write_side_stores(self.similarity.clone(), self.graph.clone(), record.clone()).await
    }

    fn spawn_side_writes(&self, record: &Record) {
        if self.similarity.is_none() && self.graph.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(record_id = %record.id, "No runtime; side store writes skipped");
            return;
        };
        let similarity = self.similarity.clone();
        let graph = self.graph.clone();
        let record = record.clone();
        handle.spawn(async move {
            write_side_stores(similarity, graph, record).await;
        });
    }

    fn spawn_graph_delete(&self, id: &str) {
        let Some(graph) = self.graph.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = id.to_string();
        handle.spawn(async move {
            best_effort("graph", "delete_node", Some(graph.delete_node(&id))).await;
        });
    }
}

async fn write_side_stores(
    similarity: Option<Arc<dyn SimilarityBackend>>,
    graph: Option<Arc<dyn GraphStore>>,
    record: Record,
) -> (SideStoreOutcome, SideStoreOutcome) {
    let mut metadata = record.metadata.clone();
    metadata.insert(
        RECORD_ID_KEY.to_string(),
        serde_json::Value::String(record.id.clone()),
    );

    let similarity_outcome = best_effort(
        "similarity",
        "add",
        similarity
            .as_ref()
            .map(|s| s.add(&record.content, &record.user_id, &metadata)),
    )
    .await;
    let graph_outcome = best_effort(
        "graph",
        "add_node",
        graph
            .as_ref()
            .map(|g| g.add_node(&record.id, &record.content, &record.user_id)),
    )
    .await;
    (similarity_outcome, graph_outcome)
}
