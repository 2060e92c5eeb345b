//! Disque commands and their typed options.
//!
//! Argument order is part of the broker's wire contract:
//!
//! ```text
//! ADDJOB queue body <ms-timeout> [REPLICATE n] [DELAY s] [RETRY s] [TTL s] [MAXLEN n] [ASYNC]
//! GETJOB [NOHANG] [TIMEOUT ms] [COUNT n] [WITHCOUNTERS] FROM queue1 queue2 ...
//! ACKJOB id | NACK id | DELJOB id | QLEN queue | SHOW id | CLUSTER NODES
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::error::DisqueError;

/// A single command line sent to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<String>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Appends several arguments in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Builds the equivalent `redis::Cmd` for the wire.
    pub fn to_redis_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::cmd(self.name);
        for arg in &self.args {
            cmd.arg(arg.as_str());
        }
        cmd
    }

    pub fn add_job(queue: &str, body: &str, timeout: Duration, options: &PushOptions) -> Self {
        Command::new("ADDJOB")
            .arg(queue)
            .arg(body)
            .arg(timeout.as_millis())
            .args(options.to_args())
    }

    pub fn ack_job(job_id: &str) -> Self {
        Command::new("ACKJOB").arg(job_id)
    }

    pub fn nack(job_id: &str) -> Self {
        Command::new("NACK").arg(job_id)
    }

    pub fn del_job(job_id: &str) -> Self {
        Command::new("DELJOB").arg(job_id)
    }

    pub fn qlen(queue: &str) -> Self {
        Command::new("QLEN").arg(queue)
    }

    pub fn show(job_id: &str) -> Self {
        Command::new("SHOW").arg(job_id)
    }

    pub fn cluster_nodes() -> Self {
        Command::new("CLUSTER").arg("NODES")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Modifiers for `ADDJOB`.
///
/// Options are either bare flags (`ASYNC`) or name/value pairs
/// (`TTL 60`). The typed setters cover everything the broker documents;
/// [`flag`](Self::flag) and [`option`](Self::option) pass other names
/// through for the broker to validate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    flags: BTreeSet<String>,
    values: BTreeMap<String, String>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes the job is replicated to.
    pub fn replicate(self, count: u32) -> Self {
        self.set_value("REPLICATE", count.to_string())
    }

    /// Time before the job is queued for delivery.
    pub fn delay(self, delay: Duration) -> Self {
        self.set_value("DELAY", delay.as_secs().to_string())
    }

    /// Requeue interval when the job is not acknowledged.
    pub fn retry(self, retry: Duration) -> Self {
        self.set_value("RETRY", retry.as_secs().to_string())
    }

    /// Maximum lifetime of the job.
    pub fn ttl(self, ttl: Duration) -> Self {
        self.set_value("TTL", ttl.as_secs().to_string())
    }

    /// Refuse the job when the queue already holds this many jobs.
    pub fn maxlen(self, max: u64) -> Self {
        self.set_value("MAXLEN", max.to_string())
    }

    /// Return before the job is replicated to the requested nodes.
    pub fn asynchronous(mut self) -> Self {
        self.values.remove("ASYNC");
        self.flags.insert("ASYNC".to_string());
        self
    }

    /// Adds a bare flag the client does not know about.
    pub fn flag(mut self, name: &str) -> Result<Self, DisqueError> {
        let name = validate_name(name)?;
        if self.values.contains_key(&name) {
            return Err(DisqueError::InvalidOption(format!(
                "{name} is already set with a value"
            )));
        }
        self.flags.insert(name);
        Ok(self)
    }

    /// Adds a name/value option the client does not know about.
    pub fn option(mut self, name: &str, value: impl Into<String>) -> Result<Self, DisqueError> {
        let name = validate_name(name)?;
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DisqueError::InvalidOption(format!("{name} requires a value")));
        }
        if self.flags.contains(&name) {
            return Err(DisqueError::InvalidOption(format!(
                "{name} is already set as a flag"
            )));
        }
        self.values.insert(name, value);
        Ok(self)
    }

    /// Flattens into command arguments: value options first, then flags.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.values.len() * 2 + self.flags.len());
        for (name, value) in &self.values {
            args.push(name.clone());
            args.push(value.clone());
        }
        args.extend(self.flags.iter().cloned());
        args
    }

    fn set_value(mut self, name: &str, value: String) -> Self {
        self.flags.remove(name);
        self.values.insert(name.to_string(), value);
        self
    }
}

fn validate_name(name: &str) -> Result<String, DisqueError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DisqueError::InvalidOption("empty option name".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DisqueError::InvalidOption(format!(
            "option name '{name}' contains invalid characters"
        )));
    }
    Ok(name.to_ascii_uppercase())
}

/// Parameters of a `GETJOB` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Queues to fetch from, in priority order.
    pub queues: Vec<String>,
    /// Maximum number of jobs to return.
    pub count: usize,
    /// How long the broker may block waiting for jobs. Zero blocks forever.
    pub timeout: Duration,
    /// Return immediately even when no job is available.
    pub no_hang: bool,
}

impl FetchOptions {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queues: vec![queue.into()],
            count: 1,
            timeout: Duration::from_secs(1),
            no_hang: false,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queues.push(queue.into());
        self
    }

    pub fn no_hang(mut self) -> Self {
        self.no_hang = true;
        self
    }

    /// Builds the `GETJOB` command. Counters are always requested since
    /// the decoded `Job` carries them.
    pub fn to_command(&self) -> Result<Command, DisqueError> {
        if self.queues.is_empty() {
            return Err(DisqueError::InvalidOption(
                "GETJOB needs at least one queue".to_string(),
            ));
        }
        if self.count == 0 {
            return Err(DisqueError::InvalidOption(
                "GETJOB count must be at least 1".to_string(),
            ));
        }

        let mut cmd = Command::new("GETJOB");
        if self.no_hang {
            cmd = cmd.arg("NOHANG");
        }
        Ok(cmd
            .arg("TIMEOUT")
            .arg(self.timeout.as_millis())
            .arg("COUNT")
            .arg(self.count)
            .arg("WITHCOUNTERS")
            .arg("FROM")
            .args(&self.queues))
    }
}
