//! memshuttle SDK - Two-tier memory engine
//!
//! This crate builds the synchronization layer on top of `memshuttle-core`:
//!
//! # Core Modules (from memshuttle-core)
//!
//! - **stm** - Bounded in-memory short-term store
//! - **ltm** - Remote long-term memory client
//! - **types** - Record model
//!
//! # SDK Modules
//!
//! - **shuttle** - Upload/preload workers, deduplication and statistics
//! - **engine** - `MemoryEngine` facade wiring the tiers together
//! - **config** - Shuttle and engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use memshuttle_sdk::{EngineConfig, MemoryEngine};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let engine = MemoryEngine::new(EngineConfig::default())?;
//!     engine.initialize().await;
//!     engine.start().await;
//!
//!     // Store short-term memory; the shuttle uploads it in the background
//!     engine.remember("User prefers dark mode", "user-123", "settings", Default::default())?;
//!
//!     // Or push it out right away
//!     let report = engine.flush("user-123").await;
//!     println!("uploaded {}", report.uploaded);
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Re-export core modules from memshuttle-core
// ─────────────────────────────────────────────────────────────────────────────

/// Short-term store
pub use memshuttle_core::stm;

/// Long-term memory client
pub use memshuttle_core::ltm;

/// Record model and remote payloads
pub use memshuttle_core::types;

/// Error types from core
pub use memshuttle_core::error as core_error;

// ─────────────────────────────────────────────────────────────────────────────
// SDK-specific modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod shuttle;

mod error;

// Re-export main SDK types
pub use config::{ConfigValidationError, DedupMode, EngineConfig, LtmConfig, ShuttleConfig, StmConfig};
pub use engine::{AlwaysRemember, EngineStats, MemoryClassifier, MemoryEngine, Recall};
pub use error::{SDKError, SDKResult};
pub use shuttle::{Deduplicator, ShuttleOrchestrator, ShuttleStats, UploadReport};
