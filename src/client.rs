//! Disque cluster client with adaptive node affinity.
//!
//! The client keeps one working connection. Every command goes through the
//! same call path:
//!
//! 1. **Attempt** the command on the working connection.
//! 2. On a transport failure, **Recover** by re-discovering the cluster.
//! 3. **Retry** the command exactly once on the new working connection.
//!
//! Fetches additionally feed per-node statistics; once per cycle the client
//! moves its working connection to the node producing most of its jobs.

use std::sync::Arc;
use std::time::Duration;

use redis::{FromRedisValue, Value};
use tracing::{debug, info, warn};

use crate::command::{Command, FetchOptions, PushOptions};
use crate::config::ClientConfig;
use crate::error::DisqueError;
use crate::job::{decode_job_details, decode_jobs, Job, JobDetails};
use crate::selector::NodeSelector;
use crate::stats::FetchStats;
use crate::topology::{ClusterNode, Topology, TopologyExplorer};
use crate::transport::{Connection, Dialer, RedisDialer};

/// Stage of a single command invocation.
enum CallPhase {
    Attempt,
    Recover(DisqueError),
    Retry,
}

/// A client bound to one working node at a time.
pub struct DisqueClient {
    explorer: TopologyExplorer,
    dialer: Arc<dyn Dialer>,
    topology: Topology,
    working: Option<Box<dyn Connection>>,
    selector: NodeSelector,
}

impl DisqueClient {
    /// Creates a client over the default TCP transport. No connection is
    /// opened until [`initialize`](Self::initialize).
    ///
    /// A `cycle_length` of 0 is treated as 1. Use
    /// [`from_config`](Self::from_config) to reject it instead.
    pub fn new(seeds: Vec<String>, cycle_length: usize) -> Self {
        Self::with_dialer(seeds, cycle_length, Arc::new(RedisDialer::default()))
    }

    /// Creates a client from a validated configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, DisqueError> {
        config.validate()?;
        Ok(Self::with_dialer(
            config.seeds.clone(),
            config.cycle_length,
            Arc::new(RedisDialer::new(config.connect_timeout)),
        ))
    }

    /// Creates a client from `DISQUE_NODES` and `DISQUE_CYCLE`.
    pub fn from_env() -> Result<Self, DisqueError> {
        Self::from_config(&ClientConfig::from_env()?)
    }

    /// Creates a client over `dialer`. As with [`new`](Self::new), a
    /// `cycle_length` of 0 is treated as 1.
    pub fn with_dialer(seeds: Vec<String>, cycle_length: usize, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            explorer: TopologyExplorer::new(seeds, Arc::clone(&dialer)),
            dialer,
            topology: Topology::new(),
            working: None,
            selector: NodeSelector::new(cycle_length),
        }
    }

    /// Discovers the cluster and opens the working connection.
    pub async fn initialize(&mut self) -> Result<(), DisqueError> {
        self.discover().await
    }

    /// Closes the working connection.
    ///
    /// The next command triggers re-discovery through the retry path.
    pub fn close(&mut self) {
        if let Some(conn) = self.working.take() {
            debug!(address = %conn.address(), "Closing working connection");
            conn.close();
        }
    }

    /// Enqueues a job and returns its id.
    pub async fn push(
        &mut self,
        queue: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<String, DisqueError> {
        self.push_with_options(queue, body, timeout, &PushOptions::new())
            .await
    }

    pub async fn push_with_options(
        &mut self,
        queue: &str,
        body: &str,
        timeout: Duration,
        options: &PushOptions,
    ) -> Result<String, DisqueError> {
        let reply = self
            .call(&Command::add_job(queue, body, timeout, options))
            .await?;
        decode(reply)
    }

    /// Fetches up to `count` jobs, blocking up to `timeout`.
    pub async fn fetch(
        &mut self,
        queue: &str,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Job>, DisqueError> {
        self.fetch_with(&FetchOptions::new(queue).with_count(count).with_timeout(timeout))
            .await
    }

    /// Fetches at most one job.
    pub async fn fetch_one(
        &mut self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Job>, DisqueError> {
        let jobs = self.fetch(queue, 1, timeout).await?;
        Ok(jobs.into_iter().next())
    }

    /// Fetches up to `count` jobs without blocking.
    pub async fn fetch_no_hang(&mut self, queue: &str, count: usize) -> Result<Vec<Job>, DisqueError> {
        self.fetch_with(&FetchOptions::new(queue).with_count(count).no_hang())
            .await
    }

    /// Runs one `GETJOB` and updates affinity statistics.
    pub async fn fetch_with(&mut self, options: &FetchOptions) -> Result<Vec<Job>, DisqueError> {
        let command = options.to_command()?;

        if let Err(e) = self.maybe_rebalance().await {
            warn!(error = %e, "Failed to switch working node, falling back to rediscovery");
        }

        let jobs = decode_jobs(self.call(&command).await?)?;
        for job in &jobs {
            match job.node_prefix() {
                Some(prefix) => self.selector.record(prefix),
                None => debug!(id = %job.id, "Job id carries no node prefix"),
            }
        }

        debug!(queues = ?options.queues, fetched = jobs.len(), "Fetched jobs");
        Ok(jobs)
    }

    pub async fn ack(&mut self, job_id: &str) -> Result<(), DisqueError> {
        self.affect_job(Command::ack_job(job_id), job_id).await
    }

    /// Puts a job back in the queue without incrementing its retry count.
    pub async fn nack(&mut self, job_id: &str) -> Result<(), DisqueError> {
        self.affect_job(Command::nack(job_id), job_id).await
    }

    pub async fn delete(&mut self, job_id: &str) -> Result<(), DisqueError> {
        self.affect_job(Command::del_job(job_id), job_id).await
    }

    pub async fn queue_length(&mut self, queue: &str) -> Result<u64, DisqueError> {
        let reply = self.call(&Command::qlen(queue)).await?;
        decode(reply)
    }

    pub async fn job_details(&mut self, job_id: &str) -> Result<JobDetails, DisqueError> {
        let reply = self.call(&Command::show(job_id)).await?;
        decode_job_details(job_id, reply)
    }

    /// Raw membership as reported by the working node.
    pub async fn cluster_nodes(&mut self) -> Result<Vec<ClusterNode>, DisqueError> {
        let reply = self.call(&Command::cluster_nodes()).await?;
        let listing: String = decode(reply)?;
        Ok(crate::topology::parse_cluster_nodes(&listing))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn current_prefix(&self) -> Option<&str> {
        self.selector.current_prefix()
    }

    pub fn current_address(&self) -> Option<&str> {
        self.selector.current_address()
    }

    pub fn stats(&self) -> &FetchStats {
        self.selector.stats()
    }

    pub fn cycle_length(&self) -> usize {
        self.selector.cycle_length()
    }

    pub fn is_connected(&self) -> bool {
        self.working.is_some()
    }

    async fn affect_job(&mut self, command: Command, job_id: &str) -> Result<(), DisqueError> {
        let affected: i64 = decode(self.call(&command).await?)?;
        if affected == 0 {
            return Err(DisqueError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Re-runs discovery. On failure the previous topology is kept and the
    /// suspect working connection stays closed.
    async fn discover(&mut self) -> Result<(), DisqueError> {
        match self.explorer.discover(&mut self.working).await {
            Ok(discovery) => {
                self.topology = discovery.topology;
                self.selector
                    .attach(discovery.self_prefix, discovery.self_address);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    async fn call(&mut self, command: &Command) -> Result<Value, DisqueError> {
        let mut phase = CallPhase::Attempt;
        loop {
            phase = match phase {
                CallPhase::Attempt => match self.execute(command).await {
                    Err(e) if e.is_transport() => CallPhase::Recover(e),
                    result => return result,
                },
                CallPhase::Recover(cause) => {
                    warn!(
                        command = command.name(),
                        error = %cause,
                        "Command failed on working node, rediscovering cluster"
                    );
                    self.discover().await?;
                    CallPhase::Retry
                }
                CallPhase::Retry => return self.execute(command).await,
            };
        }
    }

    async fn execute(&mut self, command: &Command) -> Result<Value, DisqueError> {
        let conn = self.working.as_mut().ok_or(DisqueError::NotConnected)?;
        Ok(conn.execute(command).await?)
    }

    /// Counts one fetch and, at the cycle boundary, moves the working
    /// connection to the busiest known node.
    async fn maybe_rebalance(&mut self) -> Result<(), DisqueError> {
        if !self.selector.tick() {
            return Ok(());
        }

        let Some((prefix, address)) = self.selector.candidate(&self.topology) else {
            return Ok(());
        };

        let previous = self.selector.current_prefix().map(str::to_string);
        self.close();
        self.working = Some(self.dialer.dial(&address).await?);

        info!(
            from = ?previous,
            to = %prefix,
            address = %address,
            "Switched working node to busiest job producer"
        );
        self.selector.commit(prefix, address);
        Ok(())
    }
}

fn decode<T: FromRedisValue>(reply: Value) -> Result<T, DisqueError> {
    Ok(T::from_redis_value(&reply)?)
}
