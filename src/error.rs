//! Error types for Disque client operations.
//!
//! The taxonomy follows how a failure should be handled:
//! - Discovery failures (no seed answered with cluster members)
//! - Transport failures (connection-level; retried once after re-discovery)
//! - Protocol failures (the broker rejected the command; never retried)
//! - Decode failures (reply shape did not match; never retried)
//! - Pool failures (checkout, capacity, shutdown)

use std::time::Duration;

use redis::{ErrorKind, RedisError};
use thiserror::Error;

/// Errors that can occur while talking to a Disque cluster.
#[derive(Debug, Error)]
pub enum DisqueError {
    /// No seed host was reachable or none reported cluster members.
    #[error("Nodes unavailable: no seed host reported cluster members")]
    NoNodesAvailable,

    /// The client has no working connection (never initialized, or closed).
    #[error("Not connected to any cluster node")]
    NotConnected,

    /// Connection-level failure while executing a command.
    #[error("Transport error: {0}")]
    Transport(#[source] RedisError),

    /// The broker replied with an error.
    #[error("Broker rejected command ({code}): {message}")]
    Protocol { code: String, message: String },

    /// The reply did not have the expected shape.
    #[error("Failed to decode reply: {0}")]
    Decode(String),

    /// The job does not exist on the broker (acked, deleted or never known).
    #[error("Job {0} not found")]
    JobNotFound(String),

    /// A push or fetch option failed validation.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Client configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DisqueError {
    /// Returns true for failures that warrant re-discovery and one retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, DisqueError::Transport(_) | DisqueError::NotConnected)
    }
}

impl From<RedisError> for DisqueError {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            ErrorKind::ResponseError | ErrorKind::ExtensionError => DisqueError::Protocol {
                code: err.code().unwrap_or("ERR").to_string(),
                message: err
                    .detail()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string()),
            },
            ErrorKind::TypeError => DisqueError::Decode(err.to_string()),
            _ => DisqueError::Transport(err),
        }
    }
}

/// Errors returned by the resource pool.
#[derive(Debug, Error)]
pub enum PoolError<E: std::error::Error + 'static> {
    /// The pool was closed; no further checkouts are allowed.
    #[error("Pool is closed")]
    Closed,

    /// No resource became available before the deadline.
    #[error("Timed out after {0:?} waiting for a pooled resource")]
    Timeout(Duration),

    /// Requested capacity is above the configured maximum.
    #[error("Capacity {requested} exceeds max capacity {max}")]
    CapacityExceeded { requested: usize, max: usize },

    /// The factory failed to create a resource.
    #[error("Resource creation failed: {0}")]
    Factory(#[source] E),
}
