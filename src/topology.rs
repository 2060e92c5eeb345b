//! Cluster topology discovery.
//!
//! Seeds are explored in order. The first seed that answers `CLUSTER NODES`
//! with at least one member defines the topology; the node that reports
//! itself as `myself` becomes the working connection.
//!
//! # Listing Format
//!
//! ```text
//! <node-id> <host:port> <flags> <ping-sent> <pong-received> <link-state>
//! dcb833cf24f3d6b3b7ef1f5dc0dd4d2a5d4dd6a1 127.0.0.1:7711 myself 0 0 connected
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use redis::FromRedisValue;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::DisqueError;
use crate::job::NODE_PREFIX_LEN;
use crate::transport::{Connection, Dialer};

/// Node prefix to `host:port`.
pub type Topology = HashMap<String, String>;

/// Flag marking the node that answered the membership query.
const MYSELF_FLAG: &str = "myself";

/// One member line of a `CLUSTER NODES` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub prefix: String,
    pub address: String,
    pub flags: Vec<String>,
}

impl ClusterNode {
    /// Parses one listing line; `None` for lines that do not describe a node.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let id = fields.next()?;
        let address = fields.next()?;
        let flags = fields.next()?;
        let prefix = id.get(..NODE_PREFIX_LEN)?;

        Some(Self {
            id: id.to_string(),
            prefix: prefix.to_string(),
            address: address.to_string(),
            flags: flags.split(',').map(str::to_string).collect(),
        })
    }

    pub fn is_myself(&self) -> bool {
        self.flags.iter().any(|f| f == MYSELF_FLAG)
    }
}

/// Parses a full `CLUSTER NODES` listing, skipping blank and malformed lines.
pub fn parse_cluster_nodes(listing: &str) -> Vec<ClusterNode> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let node = ClusterNode::parse(line);
            if node.is_none() {
                warn!(line = %line, "Skipping malformed cluster node line");
            }
            node
        })
        .collect()
}

/// Outcome of a successful exploration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub topology: Topology,
    /// Prefix of the node flagged `myself`, if the seed reported one.
    pub self_prefix: Option<String>,
    /// Seed address the working connection was dialed to.
    pub self_address: String,
}

/// Explores seeds to build the cluster topology.
pub struct TopologyExplorer {
    seeds: Vec<String>,
    dialer: Arc<dyn Dialer>,
}

impl TopologyExplorer {
    pub fn new(seeds: Vec<String>, dialer: Arc<dyn Dialer>) -> Self {
        Self { seeds, dialer }
    }

    /// Builds a fresh topology and installs a working connection in `working`.
    ///
    /// The previous working connection is closed before the new one is
    /// dialed. Seeds that are unreachable, fail the query or report no
    /// members are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `DisqueError::NoNodesAvailable` when no seed yields members.
    pub async fn discover(
        &self,
        working: &mut Option<Box<dyn Connection>>,
    ) -> Result<Discovery, DisqueError> {
        for seed in &self.seeds {
            match self.explore_seed(seed, working).await {
                Ok(Some(discovery)) => {
                    info!(
                        seed = %seed,
                        nodes = discovery.topology.len(),
                        prefix = ?discovery.self_prefix,
                        "Discovered cluster topology"
                    );
                    return Ok(discovery);
                }
                Ok(None) => {
                    warn!(seed = %seed, "Seed reported no cluster members");
                }
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Failed to explore seed");
                }
            }
        }

        Err(DisqueError::NoNodesAvailable)
    }

    async fn explore_seed(
        &self,
        seed: &str,
        working: &mut Option<Box<dyn Connection>>,
    ) -> Result<Option<Discovery>, DisqueError> {
        let mut scout = self.dialer.dial(seed).await?;
        let reply = scout.execute(&Command::cluster_nodes()).await;
        scout.close();

        let listing = String::from_redis_value(&reply?)?;
        let nodes = parse_cluster_nodes(&listing);
        if nodes.is_empty() {
            return Ok(None);
        }

        let topology: Topology = nodes
            .iter()
            .map(|node| (node.prefix.clone(), node.address.clone()))
            .collect();
        let self_prefix = nodes
            .iter()
            .find(|node| node.is_myself())
            .map(|node| node.prefix.clone());

        if let Some(previous) = working.take() {
            debug!(address = %previous.address(), "Closing previous working connection");
            previous.close();
        }
        *working = Some(self.dialer.dial(seed).await?);

        Ok(Some(Discovery {
            topology,
            self_prefix,
            self_address: seed.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{node_line, MockDialer};

    fn explorer(seeds: &[&str], dialer: &MockDialer) -> TopologyExplorer {
        TopologyExplorer::new(
            seeds.iter().map(|s| s.to_string()).collect(),
            Arc::new(dialer.clone()),
        )
    }

    #[test]
    fn test_parse_cluster_nodes() {
        let listing = format!(
            "{}\n\n{}\n   \n",
            node_line("dcb833cf", "127.0.0.1:7711", true),
            node_line("0f0c644f", "127.0.0.1:7712", false)
        );

        let nodes = parse_cluster_nodes(&listing);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].prefix, "dcb833cf");
        assert_eq!(nodes[0].address, "127.0.0.1:7711");
        assert!(nodes[0].is_myself());
        assert!(!nodes[1].is_myself());
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let listing = "short 127.0.0.1:1 myself\nabcdefgh0000\nabcdefgh0000 127.0.0.1:2 myself,noflags";
        let nodes = parse_cluster_nodes(listing);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].prefix, "abcdefgh");
        assert!(nodes[0].is_myself());
    }

    #[tokio::test]
    async fn test_discover_single_node() {
        let dialer = MockDialer::new();
        dialer.add_node("a:1", &node_line("aaaaaaaa", "a:1", true));

        let mut working = None;
        let discovery = explorer(&["a:1"], &dialer)
            .discover(&mut working)
            .await
            .expect("discovery succeeds");

        assert_eq!(discovery.topology.len(), 1);
        assert_eq!(discovery.self_prefix.as_deref(), Some("aaaaaaaa"));
        assert_eq!(discovery.self_address, "a:1");
        assert_eq!(working.as_ref().map(|c| c.address()), Some("a:1"));
        // Scout closed, only the working connection remains.
        assert_eq!(dialer.live_connections(), 1);
    }

    #[tokio::test]
    async fn test_discover_skips_unreachable_seed() {
        let dialer = MockDialer::new();
        let listing = format!(
            "{}\n{}",
            node_line("bbbbbbbb", "b:1", true),
            node_line("cccccccc", "c:1", false)
        );
        dialer.add_node("b:1", &listing);

        let mut working = None;
        let discovery = explorer(&["a:1", "b:1"], &dialer)
            .discover(&mut working)
            .await
            .expect("second seed answers");

        assert_eq!(discovery.topology.len(), 2);
        assert_eq!(discovery.topology.get("cccccccc").map(String::as_str), Some("c:1"));
        assert_eq!(dialer.dials(), vec!["a:1", "b:1", "b:1"]);
    }

    #[tokio::test]
    async fn test_discover_stops_at_first_non_empty_seed() {
        let dialer = MockDialer::new();
        dialer.add_node("a:1", "");
        dialer.add_node("b:1", &node_line("bbbbbbbb", "b:1", true));
        dialer.add_node("c:1", &node_line("cccccccc", "c:1", true));

        let mut working = None;
        let discovery = explorer(&["a:1", "b:1", "c:1"], &dialer)
            .discover(&mut working)
            .await
            .expect("b answers");

        assert_eq!(discovery.topology.len(), 1);
        assert!(discovery.topology.contains_key("bbbbbbbb"));
        assert!(!dialer.dials().contains(&"c:1".to_string()));
    }

    #[tokio::test]
    async fn test_discover_all_seeds_fail() {
        let dialer = MockDialer::new();
        dialer.add_node("a:1", &node_line("aaaaaaaa", "a:1", true));
        dialer.set_cluster_nodes("a:1", None);

        let mut working = None;
        let result = explorer(&["a:1", "z:9"], &dialer).discover(&mut working).await;

        assert!(matches!(result, Err(DisqueError::NoNodesAvailable)));
        assert!(working.is_none());
        assert_eq!(dialer.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_discover_with_no_seeds() {
        let dialer = MockDialer::new();
        let mut working = None;
        let result = explorer(&[], &dialer).discover(&mut working).await;
        assert!(matches!(result, Err(DisqueError::NoNodesAvailable)));
    }

    #[tokio::test]
    async fn test_discover_replaces_working_connection() {
        let dialer = MockDialer::new();
        dialer.add_node("a:1", &node_line("aaaaaaaa", "a:1", true));
        let explorer = explorer(&["a:1"], &dialer);

        let mut working = None;
        explorer.discover(&mut working).await.expect("first");
        explorer.discover(&mut working).await.expect("second");

        assert!(working.is_some());
        assert_eq!(dialer.live_connections(), 1);
    }

    #[tokio::test]
    async fn test_discover_without_myself_flag() {
        let dialer = MockDialer::new();
        dialer.add_node("a:1", &node_line("bbbbbbbb", "b:1", false));

        let mut working = None;
        let discovery = explorer(&["a:1"], &dialer)
            .discover(&mut working)
            .await
            .expect("members listed");

        assert!(discovery.self_prefix.is_none());
        assert_eq!(working.as_ref().map(|c| c.address()), Some("a:1"));
    }
}
