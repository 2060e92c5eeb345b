//! Configuration for clients and client pools.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DisqueError;

/// Default seed address of a local Disque node.
pub const DEFAULT_SEED: &str = "127.0.0.1:7711";

/// Default number of fetches between node re-evaluations.
pub const DEFAULT_CYCLE_LENGTH: usize = 1000;

/// Environment variable holding the comma-separated seed list.
pub const NODES_VAR: &str = "DISQUE_NODES";

/// Environment variable holding the cycle length.
pub const CYCLE_VAR: &str = "DISQUE_CYCLE";

/// Configuration for a single cluster client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Seed addresses (`host:port`), tried in order during discovery.
    pub seeds: Vec<String>,
    /// Number of fetch operations between rebalance evaluations.
    pub cycle_length: usize,
    /// Upper bound on establishing a single TCP connection.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            seeds: vec![DEFAULT_SEED.to_string()],
            cycle_length: DEFAULT_CYCLE_LENGTH,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given seeds with default cycle length.
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Reads configuration from the environment.
    ///
    /// - `DISQUE_NODES`: comma-separated seed addresses (default `127.0.0.1:7711`)
    /// - `DISQUE_CYCLE`: fetches between rebalance checks (default 1000)
    pub fn from_env() -> Result<Self, DisqueError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self, DisqueError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(nodes) = lookup(NODES_VAR) {
            config.seeds = parse_seed_list(&nodes);
        }

        if let Some(cycle) = lookup(CYCLE_VAR) {
            config.cycle_length = cycle.trim().parse().map_err(|_| {
                DisqueError::InvalidConfig(format!("{CYCLE_VAR} is not a number: {cycle}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the cycle length.
    pub fn with_cycle_length(mut self, cycle_length: usize) -> Self {
        self.cycle_length = cycle_length;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Checks that the configuration can drive a client.
    ///
    /// An empty seed list is allowed: discovery then fails with
    /// `NoNodesAvailable`, like any other unreachable cluster.
    pub fn validate(&self) -> Result<(), DisqueError> {
        if self.cycle_length == 0 {
            return Err(DisqueError::InvalidConfig(
                "cycle_length must be at least 1".to_string(),
            ));
        }
        if let Some(seed) = self.seeds.iter().find(|s| !s.contains(':')) {
            return Err(DisqueError::InvalidConfig(format!(
                "seed '{seed}' is not a host:port address"
            )));
        }
        Ok(())
    }
}

/// Configuration for a pool of clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Number of resources that may be checked out at once.
    pub capacity: usize,
    /// Upper bound for later `set_capacity` calls.
    pub max_capacity: usize,
    /// Idle resources older than this are closed instead of reused.
    /// `None` keeps idle resources forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            max_capacity: 16,
            idle_timeout: Some(Duration::from_secs(3600)),
        }
    }
}

impl PoolConfig {
    /// Creates a pool configuration with the given capacities.
    pub fn new(capacity: usize, max_capacity: usize) -> Self {
        Self {
            capacity,
            max_capacity,
            ..Default::default()
        }
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), DisqueError> {
        if self.capacity > self.max_capacity {
            return Err(DisqueError::InvalidConfig(format!(
                "capacity {} exceeds max_capacity {}",
                self.capacity, self.max_capacity
            )));
        }
        Ok(())
    }
}

/// Splits a comma-separated address list, dropping empty entries.
pub fn parse_seed_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.seeds, vec!["127.0.0.1:7711".to_string()]);
        assert_eq!(config.cycle_length, 1000);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new(["10.0.0.1:7711", "10.0.0.2:7711"])
            .with_cycle_length(50)
            .with_connect_timeout(Duration::from_millis(250));

        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.cycle_length, 50);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_client_config_rejects_zero_cycle() {
        let config = ClientConfig::default().with_cycle_length(0);
        assert!(matches!(
            config.validate(),
            Err(DisqueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_client_config_rejects_bad_seed() {
        let config = ClientConfig::new(["localhost"]);
        assert!(config.validate().is_err());

        let config = ClientConfig::new(Vec::<String>::new());
        assert!(config.validate().is_ok());
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let vars = [(NODES_VAR, "10.0.0.1:7711, 10.0.0.2:7711"), (CYCLE_VAR, " 25 ")];
        let config = ClientConfig::from_lookup(lookup(&vars)).expect("valid");

        assert_eq!(config.seeds, vec!["10.0.0.1:7711", "10.0.0.2:7711"]);
        assert_eq!(config.cycle_length, 25);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let result = ClientConfig::from_lookup(lookup(&[(CYCLE_VAR, "often")]));
        assert!(matches!(result, Err(DisqueError::InvalidConfig(msg)) if msg.contains("often")));

        let result = ClientConfig::from_lookup(lookup(&[(CYCLE_VAR, "0")]));
        assert!(matches!(result, Err(DisqueError::InvalidConfig(_))));

        let result = ClientConfig::from_lookup(lookup(&[(NODES_VAR, "nohostport")]));
        assert!(matches!(result, Err(DisqueError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_seed_list() {
        assert_eq!(
            parse_seed_list(" a:1, ,b:2,"),
            vec!["a:1".to_string(), "b:2".to_string()]
        );
        assert!(parse_seed_list("").is_empty());
    }

    #[test]
    fn test_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 4);
        assert!(config.validate().is_ok());

        let config = PoolConfig::new(8, 2).with_idle_timeout(None);
        assert!(config.idle_timeout.is_none());
        assert!(config.validate().is_err());
    }
}
