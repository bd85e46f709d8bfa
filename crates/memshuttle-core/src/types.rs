//! Shared types for memshuttle.
//!
//! These types are used by the short-term store, the long-term client and
//! the shuttle orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Open key/value metadata attached to a record.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Metadata key under which the remote (LTM) id is stored once uploaded.
pub const REMOTE_ID_KEY: &str = "remote_id";

/// Metadata key carrying the originating application on remote records.
pub const APP_ID_KEY: &str = "app_id";

// ─────────────────────────────────────────────────────────────────────────────
// Record status enums
// ─────────────────────────────────────────────────────────────────────────────

/// Upload status of a short-term record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Uploaded => write!(f, "uploaded"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "failed" => Ok(UploadStatus::Failed),
            _ => Err(format!("Invalid upload status: {}", s)),
        }
    }
}

/// Lifecycle state of a short-term record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Deleted,
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordState::Active => write!(f, "active"),
            RecordState::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for RecordState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordState::Active),
            "deleted" => Ok(RecordState::Deleted),
            _ => Err(format!("Invalid record state: {}", s)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// A record held in short-term memory.
///
/// The store owns records; callers only ever receive clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub content: String,
    pub content_hash: String,
    pub user_id: String,
    pub app_id: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    /// Derived; only meaningful on records returned by candidate selection.
    pub salience_score: f64,
    pub upload_status: UploadStatus,
    pub state: RecordState,
    /// Insertion order within the process, used to break timestamp ties.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Record {
    /// Create a fresh pending, active record.
    pub fn new(
        id: String,
        content: String,
        user_id: String,
        app_id: String,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash(&content);
        Self {
            id,
            content,
            content_hash,
            user_id,
            app_id,
            metadata,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            salience_score: 0.0,
            upload_status: UploadStatus::Pending,
            state: RecordState::Active,
            seq: 0,
        }
    }

    /// Remote id recorded by `mark_uploaded`, if any
    pub fn remote_id(&self) -> Option<&str> {
        self.metadata.get(REMOTE_ID_KEY).and_then(|v| v.as_str())
    }

    /// Whether this record is eligible for upload
    pub fn is_upload_candidate(&self) -> bool {
        self.upload_status == UploadStatus::Pending && self.state == RecordState::Active
    }

    /// Size of the content payload in bytes
    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }

    /// Record a read
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
    }
}

/// SHA-256 hex digest of record content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote (LTM) payloads
// ─────────────────────────────────────────────────────────────────────────────

/// A record as returned by the remote durable memory service.
///
/// Only `id` is required; the service is free to name the text field
/// `content`, `memory` or `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default, alias = "memory", alias = "text")]
    pub content: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteRecord {
    /// Application that produced this record, from metadata
    pub fn app_id(&self) -> Option<&str> {
        self.metadata.get(APP_ID_KEY).and_then(|v| v.as_str())
    }
}

/// Aggregate statistics reported by the remote service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStats {
    #[serde(default, alias = "total_memories")]
    pub total: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of short-term store usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StmStats {
    pub total_records: usize,
    pub users: usize,
    pub pending: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub total_bytes: usize,
    pub evictions: u64,
    pub max_memories: usize,
}
