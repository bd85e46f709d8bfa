//! SDK Configuration
//!
//! Defines configuration options for the shuttle and the memory engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use memshuttle_core::{LtmConfig, StmConfig};

/// How upload candidates are compared against recent remote content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Byte-for-byte content equality
    #[default]
    Exact,
    /// Normalized Levenshtein similarity at or above the configured threshold
    Fuzzy,
}

/// Shuttle (STM ⇄ LTM synchronization) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    /// Maximum candidates per periodic upload batch (default: 50)
    pub batch_size: usize,

    /// Upper bound on one user's upload batch in seconds (default: 30)
    pub batch_timeout_seconds: u64,

    /// Maximum summed content size of one batch in MB (default: 10)
    pub max_batch_size_mb: usize,

    /// Candidates scoring below this are skipped by periodic uploads (default: 0.0)
    pub min_salience_score: f64,

    /// Maximum queued record ids per user (default: 1000)
    pub max_pending_uploads: usize,

    /// Hot records fetched per user per preload (default: 20)
    pub preload_count: usize,

    /// Minimum minutes between preloads for one user (default: 15)
    pub preload_interval_minutes: u64,

    /// Minimum seconds between periodic uploads for one user (default: 60)
    pub upload_interval_seconds: u64,

    /// Preload worker wake-up period in seconds (default: 60)
    pub download_interval_seconds: u64,

    /// Filter candidates against recent remote content (default: true)
    pub enable_dedup: bool,

    /// Similarity threshold used by fuzzy dedup (default: 0.95)
    pub dedup_similarity_threshold: f64,

    /// Dedup comparison mode (default: exact)
    pub dedup_mode: DedupMode,

    /// Users processed concurrently within one worker cycle (default: 4)
    pub max_concurrent_users: usize,
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout_seconds: 30,
            max_batch_size_mb: 10,
            min_salience_score: 0.0,
            max_pending_uploads: 1000,
            preload_count: 20,
            preload_interval_minutes: 15,
            upload_interval_seconds: 60,
            download_interval_seconds: 60,
            enable_dedup: true,
            dedup_similarity_threshold: 0.95,
            dedup_mode: DedupMode::Exact,
            max_concurrent_users: 4,
        }
    }
}

impl ShuttleConfig {
    /// Set the periodic batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the per-user upload throttle
    pub fn with_upload_interval(mut self, seconds: u64) -> Self {
        self.upload_interval_seconds = seconds;
        self
    }

    /// Set the per-user preload throttle
    pub fn with_preload_interval(mut self, minutes: u64) -> Self {
        self.preload_interval_minutes = minutes;
        self
    }

    /// Enable or disable dedup
    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.enable_dedup = enabled;
        self
    }

    /// Set the dedup mode and similarity threshold
    pub fn with_dedup_mode(mut self, mode: DedupMode, threshold: f64) -> Self {
        self.dedup_mode = mode;
        self.dedup_similarity_threshold = threshold;
        self
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_interval_seconds)
    }

    pub fn preload_interval(&self) -> Duration {
        Duration::from_secs(self.preload_interval_minutes * 60)
    }

    pub fn download_interval(&self) -> Duration {
        Duration::from_secs(self.download_interval_seconds)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_seconds)
    }

    /// Batch size cap in bytes
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_size_mb.saturating_mul(1024 * 1024)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let positive = [
            ("shuttle.batch_size", self.batch_size as u64),
            ("shuttle.batch_timeout_seconds", self.batch_timeout_seconds),
            ("shuttle.max_batch_size_mb", self.max_batch_size_mb as u64),
            ("shuttle.max_pending_uploads", self.max_pending_uploads as u64),
            ("shuttle.preload_interval_minutes", self.preload_interval_minutes),
            ("shuttle.upload_interval_seconds", self.upload_interval_seconds),
            ("shuttle.download_interval_seconds", self.download_interval_seconds),
            ("shuttle.max_concurrent_users", self.max_concurrent_users as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigValidationError::invalid(field, "must be greater than 0"));
            }
        }

        let unit = [
            ("shuttle.min_salience_score", self.min_salience_score),
            ("shuttle.dedup_similarity_threshold", self.dedup_similarity_threshold),
        ];
        for (field, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::invalid(field, "must be between 0 and 1"));
            }
        }

        Ok(())
    }
}

/// Full engine configuration: short-term store, remote client and shuttle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Short-term store budgets
    pub stm: StmConfig,

    /// Remote long-term memory service
    pub ltm: LtmConfig,

    /// Shuttle scheduling
    pub shuttle: ShuttleConfig,
}

impl EngineConfig {
    /// Set short-term store configuration
    pub fn with_stm(mut self, stm: StmConfig) -> Self {
        self.stm = stm;
        self
    }

    /// Set remote client configuration
    pub fn with_ltm(mut self, ltm: LtmConfig) -> Self {
        self.ltm = ltm;
        self
    }

    /// Set shuttle configuration
    pub fn with_shuttle(mut self, shuttle: ShuttleConfig) -> Self {
        self.shuttle = shuttle;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.stm.max_memories == 0 {
            return Err(ConfigValidationError::invalid(
                "stm.max_memories",
                "must be greater than 0",
            ));
        }
        if self.stm.max_memories_per_user == Some(0) {
            return Err(ConfigValidationError::invalid(
                "stm.max_memories_per_user",
                "must be greater than 0",
            ));
        }
        if self.ltm.base_url.trim().is_empty() {
            return Err(ConfigValidationError::invalid("ltm.base_url", "must not be empty"));
        }
        if self.ltm.max_retries == 0 {
            return Err(ConfigValidationError::invalid(
                "ltm.max_retries",
                "must be greater than 0",
            ));
        }
        self.shuttle.validate()
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigValidationError {
    fn invalid(field: &str, message: &str) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
