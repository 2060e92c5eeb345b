//! Per-node fetch statistics.
//!
//! Every fetched job carries the prefix of the node that owns it. Counting
//! those prefixes over a selection cycle tells the client which node is
//! actually delivering its jobs.

use std::collections::HashMap;

/// Counts of fetched jobs keyed by node prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    counts: HashMap<String, u64>,
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one job served by `prefix`.
    pub fn record(&mut self, prefix: &str) {
        *self.counts.entry(prefix.to_string()).or_insert(0) += 1;
    }

    /// Entries ordered by count, highest first.
    ///
    /// Equal counts are ordered by prefix so the result only depends on
    /// the map's contents.
    pub fn rank_descending(&self) -> Vec<(String, u64)> {
        let mut ranking: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|(prefix, count)| (prefix.clone(), *count))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranking
    }

    /// The most frequently seen prefix, if any.
    pub fn top(&self) -> Option<(String, u64)> {
        self.rank_descending().into_iter().next()
    }

    pub fn get(&self, prefix: &str) -> u64 {
        self.counts.get(prefix).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, prefix: &str, count: u64) {
        self.counts.insert(prefix.to_string(), count);
    }
}
