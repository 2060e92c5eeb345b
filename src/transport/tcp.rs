//! Redis-protocol transport over TCP.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Value};
use tracing::debug;

use super::{Connection, Dialer};
use crate::command::Command;

/// Dials Disque nodes with the `redis` crate's multiplexed tokio connection.
#[derive(Debug, Clone)]
pub struct RedisDialer {
    connect_timeout: Duration,
}

impl RedisDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for RedisDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Dialer for RedisDialer {
    async fn dial(&self, address: &str) -> Result<Box<dyn Connection>, RedisError> {
        let client = redis::Client::open(format!("redis://{address}"))?;

        let inner = tokio::time::timeout(
            self.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            RedisError::from(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {address} timed out after {:?}", self.connect_timeout),
            ))
        })??;

        debug!(address = %address, "Connected");

        Ok(Box::new(RedisConnection {
            address: address.to_string(),
            inner,
        }))
    }
}

/// A live connection to one node.
pub struct RedisConnection {
    address: String,
    inner: MultiplexedConnection,
}

#[async_trait]
impl Connection for RedisConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&mut self, command: &Command) -> Result<Value, RedisError> {
        debug!(address = %self.address, command = command.name(), "Executing command");
        command
            .to_redis_cmd()
            .query_async::<_, Value>(&mut self.inner)
            .await
    }

    fn close(self: Box<Self>) {
        // The multiplexed driver task stops once its last handle is dropped.
        debug!(address = %self.address, "Closing connection");
    }
}
