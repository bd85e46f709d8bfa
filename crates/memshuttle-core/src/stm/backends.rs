//! Collaborator interfaces used by the short-term store.
//!
//! The similarity backend and the graph store are external systems. The
//! store only talks to them through these traits, and every graph call
//! (and every similarity write) is best-effort.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::Result;
use crate::types::Metadata;

/// A ranked content match from the similarity backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub content: String,
    pub score: f64,
    /// Local record id, when the backend echoes back the metadata it was given.
    pub record_id: Option<String>,
}

/// Embedding / similarity search backend.
#[async_trait]
pub trait SimilarityBackend: Send + Sync {
    /// Index content for a user.
    async fn add(&self, content: &str, user_id: &str, metadata: &Metadata) -> Result<()>;

    /// Return content ranked by similarity to `query`.
    async fn search(&self, query: &str, user_id: &str, limit: usize)
        -> Result<Vec<SimilarityMatch>>;
}

/// A node returned by the graph relationship store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub memory_id: String,
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Graph relationship store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn add_node(&self, memory_id: &str, content: &str, user_id: &str) -> Result<()>;

    async fn search_by_user(&self, user_id: &str, query: &str, limit: usize)
        -> Result<Vec<GraphNode>>;

    async fn delete_node(&self, memory_id: &str) -> Result<()>;
}

/// Outcome of a best-effort side-store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideStoreOutcome {
    /// The write completed.
    Written,
    /// No store is configured (or there is no runtime to run the write on).
    Skipped,
    /// The store was called and failed; the error is only logged.
    Failed(String),
}

impl SideStoreOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Run a side-store call, logging instead of propagating failures.
pub(crate) async fn best_effort<F>(store: &'static str, op: &'static str, fut: Option<F>) -> SideStoreOutcome
where
    F: Future<Output = Result<()>>,
{
    let Some(fut) = fut else {
        return SideStoreOutcome::Skipped;
    };
    match fut.await {
        Ok(()) => {
            tracing::debug!(store, op, "Side store write completed");
            SideStoreOutcome::Written
        }
        Err(e) => {
            tracing::warn!(store, op, error = %e, "Side store write failed");
            SideStoreOutcome::Failed(e.to_string())
        }
    }
}
