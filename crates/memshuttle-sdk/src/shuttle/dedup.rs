//! Upload deduplication.
//!
//! Before a batch goes out, candidates are compared with the user's most
//! recent remote records. In exact mode only identical content matches, so
//! `"X"` and `"X "` are different memories.

use std::collections::HashMap;

use memshuttle_core::ltm::{RemoteMemory, RECENT_WINDOW};
use memshuttle_core::{Record, RemoteRecord};

use crate::config::{DedupMode, ShuttleConfig};

/// A candidate that already exists remotely.
#[derive(Debug, Clone)]
pub struct Duplicate {
    pub record: Record,
    /// Id of the remote record it matched.
    pub remote_id: String,
}

/// Result of filtering one batch.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Candidates to upload, in their original order.
    pub kept: Vec<Record>,
    pub duplicates: Vec<Duplicate>,
}

/// Filters upload candidates against recent remote content.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    mode: DedupMode,
    threshold: f64,
}

impl Deduplicator {
    pub fn new(mode: DedupMode, threshold: f64) -> Self {
        Self { mode, threshold }
    }

    pub fn from_config(config: &ShuttleConfig) -> Self {
        Self::new(config.dedup_mode, config.dedup_similarity_threshold)
    }

    pub fn mode(&self) -> DedupMode {
        self.mode
    }

    /// Fetch the user's recent remote records and filter `candidates`.
    pub async fn filter(
        &self,
        remote: &dyn RemoteMemory,
        user_id: &str,
        candidates: Vec<Record>,
    ) -> DedupOutcome {
        if candidates.is_empty() {
            return DedupOutcome::default();
        }
        let recent = remote.recent(user_id, RECENT_WINDOW).await;
        self.filter_against(&recent, candidates)
    }

    /// Filter `candidates` against an already-fetched set of remote records.
    pub fn filter_against(&self, recent: &[RemoteRecord], candidates: Vec<Record>) -> DedupOutcome {
        let exact: HashMap<&str, &str> = recent
            .iter()
            .map(|r| (r.content.as_str(), r.id.as_str()))
            .collect();

        let mut outcome = DedupOutcome::default();
        for record in candidates {
            let matched = exact
                .get(record.content.as_str())
                .map(|id| id.to_string())
                .or_else(|| self.fuzzy_match(&record.content, recent));
            match matched {
                Some(remote_id) => outcome.duplicates.push(Duplicate { record, remote_id }),
                None => outcome.kept.push(record),
            }
        }
        outcome
    }

    fn fuzzy_match(&self, content: &str, recent: &[RemoteRecord]) -> Option<String> {
        if self.mode != DedupMode::Fuzzy {
            return None;
        }
        recent
            .iter()
            .map(|r| (r, strsim::normalized_levenshtein(content, &r.content)))
            .filter(|(_, similarity)| *similarity >= self.threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(r, _)| r.id.clone())
    }
}
