//! disque-affinity: a Disque cluster client that follows its jobs.
//!
//! The client discovers the cluster from a list of seed nodes, keeps a
//! single working connection and periodically moves it to whichever node
//! has been producing most of the jobs it fetches. Transport failures are
//! recovered by re-discovering the cluster and retrying once.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod pool;
pub mod selector;
pub mod stats;
pub mod topology;
pub mod transport;

pub use client::DisqueClient;
pub use command::{FetchOptions, PushOptions};
pub use config::{ClientConfig, PoolConfig};
pub use error::{DisqueError, PoolError};
pub use job::{Job, JobDetails, JobState};
pub use pool::{DisquePool, PoolStats, Pooled, ResourcePool};
pub use topology::{ClusterNode, Topology};
