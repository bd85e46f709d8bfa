//! Shuttle - bidirectional synchronization between the short-term store and
//! the remote long-term memory service.

pub mod dedup;
mod orchestrator;
mod stats;

pub use dedup::{DedupOutcome, Deduplicator, Duplicate};
pub use orchestrator::{ShuttleOrchestrator, FORCE_UPLOAD_LIMIT, UPLOAD_TICK};
pub use stats::{ShuttleStats, UploadReport, UserShuttleStats};
