//! Adaptive node affinity.
//!
//! Fetches are counted per node prefix. Every `cycle_length` fetches the
//! selector checks whether some other known node has been serving more of
//! the client's jobs than the current one and, if so, proposes it.

use tracing::debug;

use crate::stats::FetchStats;
use crate::topology::Topology;

/// Tracks the current node identity, the cycle counter and fetch statistics.
#[derive(Debug, Clone)]
pub struct NodeSelector {
    cycle_length: usize,
    counter: usize,
    current_prefix: Option<String>,
    current_address: Option<String>,
    stats: FetchStats,
}

impl NodeSelector {
    pub fn new(cycle_length: usize) -> Self {
        Self {
            cycle_length: cycle_length.max(1),
            counter: 0,
            current_prefix: None,
            current_address: None,
            stats: FetchStats::new(),
        }
    }

    /// Advances the cycle by one fetch.
    ///
    /// Returns `true` when the cycle boundary was reached; the counter is
    /// reset in that case.
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter < self.cycle_length {
            return false;
        }
        self.counter = 0;
        true
    }

    /// The node worth switching to, as `(prefix, address)`.
    ///
    /// `None` when there are no statistics, the busiest node is already the
    /// current one, or the busiest node is not part of `topology`.
    pub fn candidate(&self, topology: &Topology) -> Option<(String, String)> {
        let (prefix, count) = self.stats.top()?;

        if self.current_prefix.as_deref() == Some(prefix.as_str()) {
            debug!(prefix = %prefix, count, "Current node is still the busiest");
            return None;
        }

        match topology.get(&prefix) {
            Some(address) => Some((prefix, address.clone())),
            None => {
                debug!(prefix = %prefix, count, "Busiest node is not in the known topology");
                None
            }
        }
    }

    /// Adopts a new node after a successful switch and starts fresh statistics.
    pub fn commit(&mut self, prefix: String, address: String) {
        self.current_prefix = Some(prefix);
        self.current_address = Some(address);
        self.stats.clear();
    }

    /// Records the identity established by topology discovery.
    pub fn attach(&mut self, prefix: Option<String>, address: String) {
        self.current_prefix = prefix;
        self.current_address = Some(address);
    }

    pub fn record(&mut self, prefix: &str) {
        self.stats.record(prefix);
    }

    pub fn current_prefix(&self) -> Option<&str> {
        self.current_prefix.as_deref()
    }

    pub fn current_address(&self) -> Option<&str> {
        self.current_address.as_deref()
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    pub fn cycle_length(&self) -> usize {
        self.cycle_length
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    #[cfg(test)]
    pub(crate) fn stats_mut(&mut self) -> &mut FetchStats {
        &mut self.stats
    }
}
