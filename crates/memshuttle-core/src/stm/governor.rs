//! Resource governor.
//!
//! Decides which records to evict after an insert. The trigger is global
//! (total record count or total bytes) but victims are always taken from
//! the user whose insert crossed the budget, least-recently-used first.

use crate::types::Record;

use super::StmConfig;

/// Enforces the short-term store's count and size budgets.
#[derive(Debug, Clone)]
pub struct ResourceGovernor {
    max_memories: usize,
    max_memories_per_user: Option<usize>,
    max_total_bytes: Option<usize>,
}

impl ResourceGovernor {
    pub fn new(config: &StmConfig) -> Self {
        Self {
            max_memories: config.max_memories,
            max_memories_per_user: config.max_memories_per_user,
            max_total_bytes: config.max_total_bytes,
        }
    }

    /// Global record budget.
    pub fn max_memories(&self) -> usize {
        self.max_memories
    }

    /// Whether any budget is exceeded for the given usage.
    pub fn over_budget(&self, global_count: usize, user_count: usize, total_bytes: usize) -> bool {
        global_count > self.max_memories
            || self.max_memories_per_user.is_some_and(|m| user_count > m)
            || self.max_total_bytes.is_some_and(|m| total_bytes > m)
    }

    /// Select the ids to evict from one user's records.
    ///
    /// `user_records` are the affected user's live records; `global_count`
    /// and `total_bytes` describe the whole store after the insert. At most
    /// `user_records.len()` ids are returned.
    pub fn select_victims(
        &self,
        user_records: &[&Record],
        global_count: usize,
        total_bytes: usize,
    ) -> Vec<String> {
        if !self.over_budget(global_count, user_records.len(), total_bytes) {
            return Vec::new();
        }

        let count_excess = global_count.saturating_sub(self.max_memories);
        let user_excess = self
            .max_memories_per_user
            .map(|m| user_records.len().saturating_sub(m))
            .unwrap_or(0);
        let required = count_excess.max(user_excess);

        let mut lru: Vec<&Record> = user_records.to_vec();
        lru.sort_by_key(|r| (r.last_accessed_at, r.seq));

        let mut victims = Vec::new();
        let mut remaining_bytes = total_bytes;
        for record in lru {
            let bytes_ok = self.max_total_bytes.is_none_or(|m| remaining_bytes <= m);
            if victims.len() >= required && bytes_ok {
                break;
            }
            remaining_bytes = remaining_bytes.saturating_sub(record.size_bytes());
            victims.push(record.id.clone());
        }
        victims
    }
}
