//! memshuttle-core - Core library for memshuttle
//!
//! This crate provides the pieces shared by the SDK and the server:
//!
//! - **types**: Record model and remote payloads
//! - **stm**: Bounded in-memory short-term store with LRU eviction
//! - **ltm**: Client for the remote long-term memory service
//! - **error**: Error type used across the crate

pub mod error;
pub mod ltm;
pub mod stm;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use ltm::{LtmConfig, RemoteMemory};
#[cfg(feature = "client")]
pub use ltm::LtmClient;
pub use stm::{StmConfig, StmStore};
pub use types::{Metadata, Record, RecordState, RemoteRecord, RemoteStats, StmStats, UploadStatus};
