//! Job types and reply decoding.
//!
//! - `Job`: a job as delivered by `GETJOB ... WITHCOUNTERS`
//! - `JobDetails`: the full snapshot returned by `SHOW`
//! - `JobState`: lifecycle state reported by the broker

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use redis::{FromRedisValue, Value};
use serde::{Deserialize, Serialize};

use crate::error::DisqueError;

/// Length of the node prefix embedded in node and job identifiers.
pub const NODE_PREFIX_LEN: usize = 8;

/// Marker that precedes the node prefix in broker-assigned job ids.
const JOB_ID_MARKER: &str = "D-";

/// Number of elements in a `GETJOB ... WITHCOUNTERS` entry.
const JOB_ENTRY_LEN: usize = 7;

/// Number of elements in a `SHOW` reply (15 name/value pairs).
const SHOW_REPLY_LEN: usize = 30;

/// A job fetched from a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Queue the job was fetched from.
    pub queue: String,
    /// Broker-assigned identifier.
    pub id: String,
    /// Job payload.
    pub body: String,
    /// Times the job was negatively acknowledged.
    pub nacks: i64,
    /// Deliveries beyond the first not caused by a NACK (timeouts, node failures).
    pub additional_deliveries: i64,
}

impl Job {
    /// Prefix of the node owning this job.
    pub fn node_prefix(&self) -> Option<&str> {
        node_prefix(&self.id)
    }
}

/// Lifecycle state of a job as reported by `SHOW`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    Active,
    Acked,
    WaitRepl,
    Other(String),
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        match s {
            "queued" => JobState::Queued,
            "active" => JobState::Active,
            "acked" => JobState::Acked,
            "wait-repl" => JobState::WaitRepl,
            other => JobState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Active => write!(f, "active"),
            JobState::Acked => write!(f, "acked"),
            JobState::WaitRepl => write!(f, "wait-repl"),
            JobState::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Full snapshot of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    pub id: String,
    pub queue: String,
    pub state: JobState,
    pub replication_factor: u32,
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub delay: Duration,
    pub retry: Duration,
    pub nacks: i64,
    pub additional_deliveries: i64,
    /// Node ids the job was delivered to.
    pub nodes_delivered: Vec<String>,
    /// Node ids that confirmed replication.
    pub nodes_confirmed: Vec<String>,
    pub next_requeue_within: Duration,
    pub next_awake_within: Duration,
    pub body: String,
}

/// Extracts the owning node prefix from a job id.
///
/// Broker ids look like `D-<prefix>-<rest>`; ids without the marker are
/// read from their first character.
pub fn node_prefix(job_id: &str) -> Option<&str> {
    let rest = job_id.strip_prefix(JOB_ID_MARKER).unwrap_or(job_id);
    rest.get(..NODE_PREFIX_LEN)
}

/// Decodes a `GETJOB ... WITHCOUNTERS` reply.
///
/// A nil reply means the timeout expired with no job available.
pub fn decode_jobs(reply: Value) -> Result<Vec<Job>, DisqueError> {
    let entries = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(entries) => entries,
        other => {
            return Err(DisqueError::Decode(format!(
                "GETJOB returned {other:?}, expected an array"
            )))
        }
    };

    entries.iter().map(decode_job).collect()
}

fn decode_job(entry: &Value) -> Result<Job, DisqueError> {
    let fields = match entry {
        Value::Bulk(fields) if fields.len() == JOB_ENTRY_LEN => fields,
        other => {
            return Err(DisqueError::Decode(format!(
                "GETJOB entry {other:?} does not have {JOB_ENTRY_LEN} fields"
            )))
        }
    };

    Ok(Job {
        queue: field(fields, 0, "queue")?,
        id: field(fields, 1, "id")?,
        body: field(fields, 2, "body")?,
        nacks: field(fields, 4, "nacks")?,
        additional_deliveries: field(fields, 6, "additional-deliveries")?,
    })
}

/// Decodes a `SHOW` reply into job details.
pub fn decode_job_details(job_id: &str, reply: Value) -> Result<JobDetails, DisqueError> {
    let fields = match reply {
        Value::Nil => return Err(DisqueError::JobNotFound(job_id.to_string())),
        Value::Bulk(fields) if fields.len() == SHOW_REPLY_LEN => fields,
        Value::Bulk(fields) => {
            return Err(DisqueError::Decode(format!(
                "SHOW returned {} fields, expected {SHOW_REPLY_LEN}",
                fields.len()
            )))
        }
        other => {
            return Err(DisqueError::Decode(format!(
                "SHOW returned {other:?}, expected an array"
            )))
        }
    };

    let state: String = field(&fields, 5, "state")?;
    let ctime: i64 = field(&fields, 11, "ctime")?;

    Ok(JobDetails {
        id: field(&fields, 1, "id")?,
        queue: field(&fields, 3, "queue")?,
        state: JobState::from(state.as_str()),
        replication_factor: field(&fields, 7, "repl")?,
        ttl: Duration::from_secs(field(&fields, 9, "ttl")?),
        created_at: Utc.timestamp_nanos(ctime),
        delay: Duration::from_secs(field(&fields, 13, "delay")?),
        retry: Duration::from_secs(field(&fields, 15, "retry")?),
        nacks: field(&fields, 17, "nacks")?,
        additional_deliveries: field(&fields, 19, "additional-deliveries")?,
        nodes_delivered: field(&fields, 21, "nodes-delivered")?,
        nodes_confirmed: field(&fields, 23, "nodes-confirmed")?,
        // Overdue timers are reported as negative milliseconds.
        next_requeue_within: millis_within(field(&fields, 25, "next-requeue-within")?),
        next_awake_within: millis_within(field(&fields, 27, "next-awake-within")?),
        body: field(&fields, 29, "body")?,
    })
}

fn field<T: FromRedisValue>(fields: &[Value], index: usize, name: &str) -> Result<T, DisqueError> {
    let value = fields
        .get(index)
        .ok_or_else(|| DisqueError::Decode(format!("missing field '{name}'")))?;
    T::from_redis_value(value)
        .map_err(|e| DisqueError::Decode(format!("field '{name}': {e}")))
}

fn millis_within(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
pub(crate) fn show_reply(job_id: &str, queue: &str, body: &str, nacks: i64) -> Value {
    let data = |s: &str| Value::Data(s.as_bytes().to_vec());
    Value::Bulk(vec![
        data("id"),
        data(job_id),
        data("queue"),
        data(queue),
        data("state"),
        data("queued"),
        data("repl"),
        Value::Int(1),
        data("ttl"),
        Value::Int(86400),
        data("ctime"),
        Value::Int(1_462_000_000_000_000_000),
        data("delay"),
        Value::Int(0),
        data("retry"),
        Value::Int(300),
        data("nacks"),
        Value::Int(nacks),
        data("additional-deliveries"),
        Value::Int(0),
        data("nodes-delivered"),
        Value::Bulk(vec![data("dcb833cf0000")]),
        data("nodes-confirmed"),
        Value::Bulk(vec![]),
        data("next-requeue-within"),
        Value::Int(299_500),
        data("next-awake-within"),
        Value::Int(-20),
        data("body"),
        data(body),
    ])
}
