//! Scripted in-memory cluster for tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redis::{ErrorKind, RedisError, Value};

use super::{Connection, Dialer};
use crate::command::Command;

/// A reply the mock node will produce for the next non-discovery command.
#[derive(Debug, Clone)]
pub enum MockReply {
    Value(Value),
    /// Connection drops mid-command.
    IoError,
    /// The node answers with an error line.
    ErrorReply(String),
}

#[derive(Debug, Default)]
struct MockNode {
    reachable: bool,
    cluster_nodes: Option<String>,
    replies: VecDeque<MockReply>,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: HashMap<String, MockNode>,
    dials: Vec<String>,
    executed: Vec<(String, String)>,
    live: usize,
}

/// Dialer over a set of fake nodes keyed by address.
#[derive(Debug, Clone, Default)]
pub struct MockDialer {
    state: Arc<Mutex<MockState>>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reachable node answering `CLUSTER NODES` with `listing`.
    pub fn add_node(&self, address: &str, listing: &str) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.nodes.insert(
            address.to_string(),
            MockNode {
                reachable: true,
                cluster_nodes: Some(listing.to_string()),
                replies: VecDeque::new(),
            },
        );
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.nodes.entry(address.to_string()).or_default().reachable = reachable;
    }

    pub fn set_cluster_nodes(&self, address: &str, listing: Option<&str>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.nodes.entry(address.to_string()).or_default().cluster_nodes =
            listing.map(str::to_string);
    }

    /// Queues a reply for the next command other than `CLUSTER NODES`.
    pub fn push_reply(&self, address: &str, reply: MockReply) {
        let mut state = self.state.lock().expect("lock poisoned");
        state
            .nodes
            .entry(address.to_string())
            .or_default()
            .replies
            .push_back(reply);
    }

    /// Every address dialed so far, in order.
    pub fn dials(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").dials.clone()
    }

    /// Executed commands as `(address, command line)`, excluding discovery.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.state.lock().expect("lock poisoned").executed.clone()
    }

    /// Number of connections opened and not yet closed.
    pub fn live_connections(&self) -> usize {
        self.state.lock().expect("lock poisoned").live
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, address: &str) -> Result<Box<dyn Connection>, RedisError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.dials.push(address.to_string());

        let reachable = state.nodes.get(address).map(|n| n.reachable).unwrap_or(false);
        if !reachable {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into());
        }

        state.live += 1;
        Ok(Box::new(MockConnection {
            address: address.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    address: String,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&mut self, command: &Command) -> Result<Value, RedisError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let node = state
            .nodes
            .get_mut(&self.address)
            .ok_or_else(|| RedisError::from(io::Error::from(io::ErrorKind::BrokenPipe)))?;

        if !node.reachable {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }

        if command.name() == "CLUSTER" {
            return match &node.cluster_nodes {
                Some(listing) => Ok(Value::Data(listing.clone().into_bytes())),
                None => Err((ErrorKind::ResponseError, "cluster unavailable").into()),
            };
        }

        let reply = node.replies.pop_front();
        state
            .executed
            .push((self.address.clone(), command.to_string()));

        match reply {
            Some(MockReply::Value(value)) => Ok(value),
            Some(MockReply::IoError) => Err(io::Error::from(io::ErrorKind::ConnectionReset).into()),
            Some(MockReply::ErrorReply(detail)) => Err((
                ErrorKind::ResponseError,
                "An error was signalled by the server",
                detail,
            )
                .into()),
            None => Ok(Value::Okay),
        }
    }

    fn close(self: Box<Self>) {}
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.live -= 1;
        }
    }
}

/// A `CLUSTER NODES` line for a node whose id starts with `prefix`.
pub fn node_line(prefix: &str, address: &str, myself: bool) -> String {
    let flags = if myself { "myself" } else { "noflags" };
    format!("{prefix}{} {address} {flags} 0 1000 connected", "0".repeat(32))
}

/// A `GETJOB ... WITHCOUNTERS` entry.
pub fn job_entry(queue: &str, id: &str, body: &str, nacks: i64, additional: i64) -> Value {
    Value::Bulk(vec![
        Value::Data(queue.as_bytes().to_vec()),
        Value::Data(id.as_bytes().to_vec()),
        Value::Data(body.as_bytes().to_vec()),
        Value::Data(b"nacks".to_vec()),
        Value::Int(nacks),
        Value::Data(b"additional-deliveries".to_vec()),
        Value::Int(additional),
    ])
}
