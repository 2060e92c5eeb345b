//! Request/response transport used to reach cluster nodes.
//!
//! The client only needs three things from the wire layer: open a
//! connection to an address, execute a command on it, and close it.
//! [`Dialer`] and [`Connection`] capture exactly that so that the
//! discovery, rebalancing and retry logic can be exercised against an
//! in-memory cluster in tests. [`RedisDialer`] is the production
//! implementation on top of the `redis` crate.

mod tcp;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use redis::{RedisError, Value};

use crate::command::Command;

pub use tcp::{RedisConnection, RedisDialer};

/// An open connection to one cluster node.
#[async_trait]
pub trait Connection: Send {
    /// The `host:port` this connection was dialed to.
    fn address(&self) -> &str;

    /// Executes a command and returns the raw reply.
    async fn execute(&mut self, command: &Command) -> Result<Value, RedisError>;

    /// Closes the connection.
    fn close(self: Box<Self>);
}

/// Opens connections to cluster nodes.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Box<dyn Connection>, RedisError>;
}
