//! CLI command definitions for disque-affinity.
//!
//! Each subcommand builds one client, initializes it against the seed
//! list and runs a single operation.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use crate::client::DisqueClient;
use crate::command::{FetchOptions, PushOptions};
use crate::config::{
    parse_seed_list, ClientConfig, CYCLE_VAR, DEFAULT_CYCLE_LENGTH, DEFAULT_SEED, NODES_VAR,
};
use crate::job::Job;

/// Default ADDJOB replication timeout in milliseconds.
const DEFAULT_PUSH_TIMEOUT_MS: u64 = 1000;

/// Default GETJOB blocking timeout in milliseconds.
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 1000;

/// Command-line client for a Disque cluster with node affinity.
#[derive(Parser)]
#[command(name = "disque-affinity")]
#[command(about = "Talk to a Disque cluster, following the node that produces your jobs")]
#[command(version)]
#[command(
    long_about = "disque-affinity discovers a Disque cluster from a list of seed nodes and runs job commands against it.\n\nExample usage:\n  disque-affinity --nodes 127.0.0.1:7711 push queue1 'hello'\n  disque-affinity fetch queue1 --count 10 --timeout 2000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Comma-separated seed addresses.
    #[arg(long, env = NODES_VAR, default_value = DEFAULT_SEED, global = true)]
    pub nodes: String,

    /// Fetches between node affinity checks.
    #[arg(long, env = CYCLE_VAR, default_value_t = DEFAULT_CYCLE_LENGTH, global = true)]
    pub cycle: usize,

    /// Connect timeout in milliseconds.
    #[arg(long, default_value = "5000", global = true)]
    pub connect_timeout: u64,

    /// Print results as JSON.
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Show the cluster members known to the working node.
    Nodes,

    /// Enqueue a job.
    #[command(alias = "add")]
    Push(PushArgs),

    /// Fetch jobs from one or more queues.
    #[command(alias = "get")]
    Fetch(FetchArgs),

    /// Acknowledge a processed job.
    Ack(JobArgs),

    /// Requeue a job without counting a retry.
    Nack(JobArgs),

    /// Delete a job.
    Del(JobArgs),

    /// Print the length of a queue.
    Qlen(QueueArgs),

    /// Print the full state of a job.
    Show(JobArgs),
}

/// Arguments for `disque-affinity push`.
#[derive(Parser, Debug)]
pub struct PushArgs {
    pub queue: String,
    pub body: String,

    /// Replication timeout in milliseconds.
    #[arg(short = 't', long, default_value_t = DEFAULT_PUSH_TIMEOUT_MS)]
    pub timeout: u64,

    /// Number of nodes to replicate the job to.
    #[arg(long)]
    pub replicate: Option<u32>,

    /// Seconds before the job is queued.
    #[arg(long)]
    pub delay: Option<u64>,

    /// Seconds before an unacknowledged job is requeued.
    #[arg(long)]
    pub retry: Option<u64>,

    /// Seconds the job may live.
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Refuse the job if the queue already holds this many jobs.
    #[arg(long)]
    pub maxlen: Option<u64>,

    /// Return before replication completes.
    #[arg(long = "async")]
    pub asynchronous: bool,
}

impl PushArgs {
    fn options(&self) -> PushOptions {
        let mut options = PushOptions::new();
        if let Some(n) = self.replicate {
            options = options.replicate(n);
        }
        if let Some(s) = self.delay {
            options = options.delay(Duration::from_secs(s));
        }
        if let Some(s) = self.retry {
            options = options.retry(Duration::from_secs(s));
        }
        if let Some(s) = self.ttl {
            options = options.ttl(Duration::from_secs(s));
        }
        if let Some(n) = self.maxlen {
            options = options.maxlen(n);
        }
        if self.asynchronous {
            options = options.asynchronous();
        }
        options
    }
}

/// Arguments for `disque-affinity fetch`.
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Queues to fetch from, in priority order.
    #[arg(required = true)]
    pub queues: Vec<String>,

    /// Maximum number of jobs to return.
    #[arg(short = 'c', long, default_value = "1")]
    pub count: usize,

    /// Blocking timeout in milliseconds. Zero blocks until a job arrives.
    #[arg(short = 't', long, default_value_t = DEFAULT_FETCH_TIMEOUT_MS)]
    pub timeout: u64,

    /// Return immediately when no job is available.
    #[arg(long)]
    pub no_hang: bool,
}

impl FetchArgs {
    fn options(&self) -> FetchOptions {
        let mut queues = self.queues.iter();
        let mut options = FetchOptions::new(queues.next().cloned().unwrap_or_default())
            .with_count(self.count)
            .with_timeout(Duration::from_millis(self.timeout));
        for queue in queues {
            options = options.with_queue(queue.clone());
        }
        if self.no_hang {
            options = options.no_hang();
        }
        options
    }
}

#[derive(Parser, Debug)]
pub struct JobArgs {
    pub job_id: String,
}

#[derive(Parser, Debug)]
pub struct QueueArgs {
    pub queue: String,
}

#[derive(Debug, Serialize)]
struct FetchOutput<'a> {
    node: Option<&'a str>,
    jobs: &'a [Job],
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = client_config(&cli)?;
    let mut client = DisqueClient::from_config(&config)?;
    client
        .initialize()
        .await
        .with_context(|| format!("Failed to reach any of {:?}", config.seeds))?;

    debug!(
        prefix = ?client.current_prefix(),
        address = ?client.current_address(),
        nodes = client.topology().len(),
        "Connected to cluster"
    );

    let result = run_command(&mut client, cli.command, cli.json).await;
    client.close();
    result
}

fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let config = ClientConfig::new(parse_seed_list(&cli.nodes))
        .with_cycle_length(cli.cycle)
        .with_connect_timeout(Duration::from_millis(cli.connect_timeout));
    config.validate()?;
    if config.seeds.is_empty() {
        anyhow::bail!("No seed nodes given; pass --nodes or set {NODES_VAR}");
    }
    Ok(config)
}

async fn run_command(client: &mut DisqueClient, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Nodes => {
            let nodes = client.cluster_nodes().await?;
            if json {
                let entries: Vec<_> = nodes
                    .iter()
                    .map(|n| {
                        serde_json::json!({
                            "id": n.id,
                            "prefix": n.prefix,
                            "address": n.address,
                            "myself": n.is_myself(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for node in &nodes {
                    let marker = if node.is_myself() { " (myself)" } else { "" };
                    println!("{} {}{}", node.prefix, node.address, marker);
                }
            }
        }
        Commands::Push(args) => {
            let id = client
                .push_with_options(
                    &args.queue,
                    &args.body,
                    Duration::from_millis(args.timeout),
                    &args.options(),
                )
                .await?;
            info!(queue = %args.queue, id = %id, "Job queued");
            if json {
                println!("{}", serde_json::json!({ "id": id }));
            } else {
                println!("{id}");
            }
        }
        Commands::Fetch(args) => {
            let jobs = client.fetch_with(&args.options()).await?;
            if json {
                let output = FetchOutput {
                    node: client.current_prefix(),
                    jobs: &jobs,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if jobs.is_empty() {
                println!("No jobs available");
            } else {
                for job in &jobs {
                    println!(
                        "{} {} {} (nacks={}, additional={})",
                        job.queue, job.id, job.body, job.nacks, job.additional_deliveries
                    );
                }
            }
        }
        Commands::Ack(args) => {
            client.ack(&args.job_id).await?;
            println!("Acknowledged {}", args.job_id);
        }
        Commands::Nack(args) => {
            client.nack(&args.job_id).await?;
            println!("Requeued {}", args.job_id);
        }
        Commands::Del(args) => {
            client.delete(&args.job_id).await?;
            println!("Deleted {}", args.job_id);
        }
        Commands::Qlen(args) => {
            let len = client.queue_length(&args.queue).await?;
            if json {
                println!("{}", serde_json::json!({ "queue": args.queue, "length": len }));
            } else {
                println!("{len}");
            }
        }
        Commands::Show(args) => {
            let details = client.job_details(&args.job_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                println!("id:        {}", details.id);
                println!("queue:     {}", details.queue);
                println!("state:     {}", details.state);
                println!("replicas:  {}", details.replication_factor);
                println!("created:   {}", details.created_at.to_rfc3339());
                println!("ttl:       {}s", details.ttl.as_secs());
                println!("nacks:     {}", details.nacks);
                println!("body:      {}", details.body);
            }
        }
    }
    Ok(())
}
