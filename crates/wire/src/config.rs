//! Stream and consumer configuration and info types
//!
//! These mirror what the log service accepts and reports. A stream owns a
//! set of subjects and an ordered sequence of records; a consumer is a
//! server-side cursor over one stream that pushes deliveries to a subject.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::Headers;

/// How records are retained in a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep records until a limit evicts them
    #[default]
    Limits,
    /// Keep records while a consumer is interested
    Interest,
    /// Remove records once acknowledged
    WorkQueue,
}

/// Where a stream keeps its records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Durable storage
    #[default]
    File,
    /// Volatile storage
    Memory,
}

/// What happens when a stream limit is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Evict the oldest records
    #[default]
    Old,
    /// Reject the new record
    New,
}

/// Cluster placement hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Target cluster
    pub cluster: String,
}

/// Source of a mirrored stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    /// Name of the stream being mirrored
    pub name: String,
}

/// Stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name
    pub name: String,
    /// Subjects captured by the stream; may contain wildcards
    pub subjects: Vec<String>,
    /// Retention policy
    pub retention: RetentionPolicy,
    /// Records kept per subject
    pub max_msgs_per_subject: u64,
    /// Total byte limit, unlimited if `None`
    pub max_bytes: Option<u64>,
    /// Per-record payload limit, unlimited if `None`
    pub max_msg_size: Option<usize>,
    /// Storage type
    pub storage: StorageType,
    /// Discard policy
    pub discard: DiscardPolicy,
    /// Replication factor
    pub num_replicas: usize,
    /// Record age limit, unlimited if `None`
    pub max_age: Option<Duration>,
    /// Placement hint
    pub placement: Option<Placement>,
    /// Mirror source
    pub mirror: Option<StreamSource>,
}

impl StreamConfig {
    /// Minimal configuration capturing the given subjects
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            retention: RetentionPolicy::default(),
            max_msgs_per_subject: 1,
            max_bytes: None,
            max_msg_size: None,
            storage: StorageType::default(),
            discard: DiscardPolicy::default(),
            num_replicas: 1,
            max_age: None,
            placement: None,
            mirror: None,
        }
    }
}

/// Counters describing the records held by a stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    /// Number of stored records
    pub messages: u64,
    /// Bytes held by stored records
    pub bytes: u64,
    /// Lowest stored sequence, 0 when empty
    pub first_seq: u64,
    /// Highest sequence ever assigned
    pub last_seq: u64,
    /// Active consumers
    pub consumer_count: usize,
}

/// Stream configuration plus state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Active configuration
    pub config: StreamConfig,
    /// Current state
    pub state: StreamState,
    /// Creation time
    pub created: DateTime<Utc>,
}

/// Acknowledgment of an append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubAck {
    /// Stream the record landed in
    pub stream: String,
    /// Sequence assigned to the record
    pub seq: u64,
    /// Whether the append was recognised as a duplicate
    pub duplicate: bool,
}

/// Options for a single append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Reject the append unless the subject's last sequence equals this
    /// value (0 meaning the subject holds no records)
    pub expected_last_subject_seq: Option<u64>,
}

/// A record as stored in a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Subject
    pub subject: String,
    /// Stream sequence
    pub seq: u64,
    /// Headers
    pub headers: Headers,
    /// Payload
    pub data: Bytes,
    /// Store time
    pub time: DateTime<Utc>,
}

/// Options for purging a stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOptions {
    /// Only purge records on subjects matching this filter
    pub filter: Option<String>,
    /// Keep this many of the newest matching records
    pub keep: Option<u64>,
    /// Purge matching records below this sequence
    pub seq: Option<u64>,
}

/// Result of a purge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeResponse {
    /// Whether the purge succeeded
    pub success: bool,
    /// Number of records removed
    pub purged: u64,
}

/// Where a consumer starts delivering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    /// Every stored record
    #[default]
    All,
    /// The last record in the stream
    Last,
    /// Only records appended after creation
    New,
    /// The last record of each subject
    LastPerSubject,
}

/// How deliveries must be acknowledged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// No acknowledgment
    None,
    /// Acknowledging a delivery acknowledges all before it
    All,
    /// Each delivery acknowledged individually
    #[default]
    Explicit,
}

/// Push consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Subject deliveries are pushed to
    pub deliver_subject: String,
    /// Starting point
    pub deliver_policy: DeliverPolicy,
    /// Acknowledgment policy
    pub ack_policy: AckPolicy,
    /// Only deliver records whose subject matches this filter
    pub filter_subject: Option<String>,
    /// Interleave flow-control requests with deliveries
    pub flow_control: bool,
    /// Send heartbeats after this much idle time
    pub idle_heartbeat: Option<Duration>,
}

impl ConsumerConfig {
    /// Ephemeral push consumer delivering to `deliver_subject`
    pub fn push(deliver_subject: impl Into<String>) -> Self {
        Self {
            deliver_subject: deliver_subject.into(),
            deliver_policy: DeliverPolicy::default(),
            ack_policy: AckPolicy::default(),
            filter_subject: None,
            flow_control: false,
            idle_heartbeat: None,
        }
    }
}

/// Consumer configuration plus creation-time state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    /// Stream the consumer reads
    pub stream: String,
    /// Server-assigned name
    pub name: String,
    /// Active configuration
    pub config: ConsumerConfig,
    /// Records the consumer will deliver from its starting point, counted
    /// at creation
    pub num_pending: u64,
    /// Creation time
    pub created: DateTime<Utc>,
}
