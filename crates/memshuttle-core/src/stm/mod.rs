//! Short-term memory (STM).
//!
//! A bounded, RAM-resident working set of records per user.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          StmStore                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ id → user    │   │ user shards  │   │ ResourceGovernor │  │
//! │  │ index        │──▶│ (one lock    │──▶│ (LRU eviction)   │  │
//! │  └──────────────┘   │  per user)   │   └──────────────────┘  │
//! │                     └──────┬───────┘                          │
//! │                            │           ┌──────────────────┐  │
//! │                            └──────────▶│ SalienceScorer   │  │
//! │                                        └──────────────────┘  │
//! │        side stores (best-effort): similarity, graph           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! In-memory operations never suspend. Calls into the similarity backend
//! and graph store are the only await points.

mod backends;
mod governor;
mod salience;
mod store;

pub use backends::*;
pub use governor::*;
pub use salience::*;
pub use store::*;

use serde::{Deserialize, Serialize};

/// Configuration for the short-term store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Global record budget across all users (default: 1000).
    pub max_memories: usize,
    /// Optional record budget per user.
    pub max_memories_per_user: Option<usize>,
    /// Optional budget for the summed content size of all records, in bytes.
    pub max_total_bytes: Option<usize>,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            max_memories: 1000,
            max_memories_per_user: None,
            max_total_bytes: None,
        }
    }
}

impl StmConfig {
    /// Config with only a global count budget.
    pub fn with_max_memories(max_memories: usize) -> Self {
        Self {
            max_memories,
            ..Default::default()
        }
    }
}
