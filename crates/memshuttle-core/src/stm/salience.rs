//! Salience scoring.
//!
//! `salience = 0.6 * recency + 0.4 * usage` where recency decays linearly
//! to zero over seven days and usage saturates at ten accesses. Scores are
//! always computed against the current clock and never cached.

use chrono::{DateTime, Utc};

use crate::types::Record;

/// Hours over which recency decays to zero (one week).
pub const RECENCY_DECAY_HOURS: f64 = 168.0;

/// Access count at which the usage component saturates.
pub const USAGE_SATURATION: u32 = 10;

/// Computes a 0-1 importance score from recency and usage.
#[derive(Debug, Clone, Copy)]
pub struct SalienceScorer {
    recency_weight: f64,
    usage_weight: f64,
}

impl Default for SalienceScorer {
    fn default() -> Self {
        Self {
            recency_weight: 0.6,
            usage_weight: 0.4,
        }
    }
}

impl SalienceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a record against the current time.
    pub fn score(&self, record: &Record) -> f64 {
        self.score_at(record, Utc::now())
    }

    /// Score a record as of `now`.
    pub fn score_at(&self, record: &Record, now: DateTime<Utc>) -> f64 {
        let hours = hours_between(record.created_at, now);
        let recency = recency(hours);
        let usage = usage(record.access_count);
        (self.recency_weight * recency + self.usage_weight * usage).clamp(0.0, 1.0)
    }
}

/// `max(0, 1 - hours / 168)`; future timestamps count as brand new.
pub fn recency(hours_since_created: f64) -> f64 {
    (1.0 - hours_since_created.max(0.0) / RECENCY_DECAY_HOURS).max(0.0)
}

/// `min(1, access_count / 10)`
pub fn usage(access_count: u32) -> f64 {
    (access_count as f64 / USAGE_SATURATION as f64).min(1.0)
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
