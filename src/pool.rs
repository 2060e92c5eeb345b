//! Bounded pool of long-lived resources.
//!
//! Capacity is enforced with a semaphore: each checked-out resource holds a
//! permit until it is released or dropped. Released resources are kept idle
//! for reuse and closed once they have been idle longer than the configured
//! timeout.
//!
//! [`DisquePool`] specializes the pool for [`DisqueClient`]s, creating each
//! client from a shared configuration and initializing it before hand-out.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::client::DisqueClient;
use crate::config::{ClientConfig, PoolConfig};
use crate::error::{DisqueError, PoolError};
use crate::transport::{Dialer, RedisDialer};

/// Something a pool can hand out.
pub trait Resource: Send + 'static {
    /// Releases whatever the resource holds open.
    fn close(&mut self);
}

/// Creates new pool resources on demand.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Resource;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource, Self::Error>;
}

/// A checked-out resource.
///
/// Hand it back with [`ResourcePool::release`] to make it reusable. Dropping
/// it instead discards the resource and frees its slot.
pub struct Pooled<R> {
    resource: R,
    _permit: OwnedSemaphorePermit,
}

impl<R> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.resource
    }
}

struct IdleResource<R> {
    resource: R,
    since: Instant,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub max_capacity: usize,
    /// Slots free for checkout.
    pub available: usize,
    pub in_use: usize,
    /// Released resources waiting for reuse.
    pub idle: usize,
}

/// A bounded pool of resources created by `F`.
pub struct ResourcePool<F: ResourceFactory> {
    factory: F,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleResource<F::Resource>>>,
    capacity: Mutex<usize>,
    max_capacity: usize,
    idle_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl<F: ResourceFactory> ResourcePool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, DisqueError> {
        config.validate()?;

        Ok(Self {
            factory,
            semaphore: Arc::new(Semaphore::new(config.capacity)),
            idle: Mutex::new(Vec::new()),
            capacity: Mutex::new(config.capacity),
            max_capacity: config.max_capacity,
            idle_timeout: config.idle_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Checks out a resource, waiting for a free slot.
    ///
    /// Idle resources are reused most recently released first; a new one is
    /// created when none is left.
    pub async fn acquire(&self) -> Result<Pooled<F::Resource>, PoolError<F::Error>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        if let Some(resource) = self.take_idle().await {
            return Ok(Pooled {
                resource,
                _permit: permit,
            });
        }

        let resource = self.factory.create().await.map_err(PoolError::Factory)?;
        debug!("Created pooled resource");
        Ok(Pooled {
            resource,
            _permit: permit,
        })
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Pooled<F::Resource>, PoolError<F::Error>> {
        tokio::time::timeout(timeout, self.acquire())
            .await
            .map_err(|_| PoolError::Timeout(timeout))?
    }

    /// Returns a resource for reuse. On a closed pool it is closed instead.
    pub async fn release(&self, pooled: Pooled<F::Resource>) {
        let Pooled {
            mut resource,
            _permit,
        } = pooled;

        // Checked under the lock; `close` sets the flag before draining.
        let mut idle = self.idle.lock().await;
        if self.is_closed() {
            drop(idle);
            resource.close();
            return;
        }

        idle.push(IdleResource {
            resource,
            since: Instant::now(),
        });
    }

    /// Closes a resource and frees its slot.
    pub fn discard(&self, mut pooled: Pooled<F::Resource>) {
        pooled.resource.close();
    }

    /// Resizes the pool. Zero closes it.
    ///
    /// The new capacity is recorded immediately. Shrinking then waits until
    /// enough checked-out resources come back; a later grow can satisfy it.
    pub async fn set_capacity(&self, capacity: usize) -> Result<(), PoolError<F::Error>> {
        if capacity > self.max_capacity {
            return Err(PoolError::CapacityExceeded {
                requested: capacity,
                max: self.max_capacity,
            });
        }
        if capacity == 0 {
            self.close().await;
            return Ok(());
        }
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let previous = {
            let mut current = self.capacity.lock().await;
            let previous = *current;
            if capacity > previous {
                self.semaphore.add_permits(capacity - previous);
            }
            *current = capacity;
            previous
        };

        if capacity < previous {
            let surplus = (previous - capacity) as u32;
            self.semaphore
                .acquire_many(surplus)
                .await
                .map_err(|_| PoolError::Closed)?
                .forget();

            let target = *self.capacity.lock().await;
            let mut idle = self.idle.lock().await;
            if idle.len() > target {
                let excess = idle.len() - target;
                for mut entry in idle.drain(..excess) {
                    entry.resource.close();
                }
            }
        }

        info!(from = previous, to = capacity, "Resized pool");
        Ok(())
    }

    /// Closes the pool and every idle resource.
    ///
    /// Checked-out resources are closed when they come back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();
        *self.capacity.lock().await = 0;

        let mut idle = self.idle.lock().await;
        let count = idle.len();
        for mut entry in idle.drain(..) {
            entry.resource.close();
        }
        info!(closed_idle = count, "Pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> PoolStats {
        let capacity = *self.capacity.lock().await;
        let available = self.semaphore.available_permits().min(capacity);
        PoolStats {
            capacity,
            max_capacity: self.max_capacity,
            available,
            in_use: capacity - available,
            idle: self.idle.lock().await.len(),
        }
    }

    async fn take_idle(&self) -> Option<F::Resource> {
        let mut idle = self.idle.lock().await;
        while let Some(mut entry) = idle.pop() {
            if self.is_expired(&entry) {
                debug!(idle_for = ?entry.since.elapsed(), "Closing expired idle resource");
                entry.resource.close();
                continue;
            }
            return Some(entry.resource);
        }
        None
    }

    fn is_expired(&self, entry: &IdleResource<F::Resource>) -> bool {
        self.idle_timeout
            .map(|timeout| entry.since.elapsed() > timeout)
            .unwrap_or(false)
    }
}

impl Resource for DisqueClient {
    fn close(&mut self) {
        DisqueClient::close(self);
    }
}

/// Builds initialized clients from a shared configuration.
pub struct ClientFactory {
    config: ClientConfig,
    dialer: Arc<dyn Dialer>,
}

impl ClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        let dialer = Arc::new(RedisDialer::new(config.connect_timeout));
        Self::with_dialer(config, dialer)
    }

    pub fn with_dialer(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self { config, dialer }
    }
}

#[async_trait]
impl ResourceFactory for ClientFactory {
    type Resource = DisqueClient;
    type Error = DisqueError;

    async fn create(&self) -> Result<DisqueClient, DisqueError> {
        let mut client = DisqueClient::with_dialer(
            self.config.seeds.clone(),
            self.config.cycle_length,
            Arc::clone(&self.dialer),
        );
        client.initialize().await?;
        Ok(client)
    }
}

/// A pool of initialized [`DisqueClient`]s.
pub struct DisquePool {
    inner: ResourcePool<ClientFactory>,
}

impl DisquePool {
    pub fn new(client: ClientConfig, pool: PoolConfig) -> Result<Self, DisqueError> {
        client.validate()?;
        Ok(Self {
            inner: ResourcePool::new(ClientFactory::new(client), pool)?,
        })
    }

    /// Builds the pool with client settings read by [`ClientConfig::from_env`].
    pub fn from_env(pool: PoolConfig) -> Result<Self, DisqueError> {
        Self::new(ClientConfig::from_env()?, pool)
    }

    pub fn with_dialer(
        client: ClientConfig,
        pool: PoolConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, DisqueError> {
        client.validate()?;
        Ok(Self {
            inner: ResourcePool::new(ClientFactory::with_dialer(client, dialer), pool)?,
        })
    }

    pub async fn get(&self) -> Result<Pooled<DisqueClient>, PoolError<DisqueError>> {
        self.inner.acquire().await
    }

    pub async fn get_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Pooled<DisqueClient>, PoolError<DisqueError>> {
        self.inner.acquire_timeout(timeout).await
    }

    pub async fn put(&self, client: Pooled<DisqueClient>) {
        self.inner.release(client).await
    }

    pub fn discard(&self, client: Pooled<DisqueClient>) {
        self.inner.discard(client)
    }

    pub async fn set_capacity(&self, capacity: usize) -> Result<(), PoolError<DisqueError>> {
        self.inner.set_capacity(capacity).await
    }

    pub async fn close(&self) {
        self.inner.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub async fn stats(&self) -> PoolStats {
        self.inner.stats().await
    }
}
