//! Entries and record metadata
//!
//! An [`Entry`] is the materialized view of one log record in a bucket. It is
//! never stored; it is built on demand from a stored or delivered record.
//!
//! Every record carries two reserved metadata fields, transported as headers:
//! - `KV-Origin-Cluster`: the cluster the writer was connected to
//! - `KV-Operation`: present with value `DEL` on tombstones; absent (or any
//!   other value) means a normal value write

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header carrying the writer's origin cluster
pub const KV_ORIGIN_CLUSTER_HDR: &str = "KV-Origin-Cluster";

/// Header carrying the operation tag
pub const KV_OPERATION_HDR: &str = "KV-Operation";

/// Operation recorded by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Operation {
    /// A value write
    #[default]
    #[serde(rename = "PUT")]
    Put,
    /// A tombstone
    #[serde(rename = "DEL")]
    Del,
}

impl Operation {
    /// Wire tag for this operation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "PUT",
            Operation::Del => "DEL",
        }
    }

    /// Interpret an operation header value
    ///
    /// Only an exact `DEL` marks a tombstone.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("DEL") => Operation::Del,
            _ => Operation::Put,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of the reserved record headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Cluster the writer was connected to, when known
    pub origin_cluster: Option<String>,
    /// Operation tag
    pub operation: Operation,
}

impl RecordMetadata {
    /// Metadata for a value write
    pub fn put(origin_cluster: Option<String>) -> Self {
        Self {
            origin_cluster,
            operation: Operation::Put,
        }
    }

    /// Metadata for a tombstone
    pub fn delete(origin_cluster: Option<String>) -> Self {
        Self {
            origin_cluster,
            operation: Operation::Del,
        }
    }
}

/// One record of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Bucket the record belongs to
    pub bucket: String,
    /// Decoded key
    pub key: String,
    /// Decoded value (empty for tombstones)
    pub value: Bytes,
    /// Time the log service stored the record
    pub created: DateTime<Utc>,
    /// Sequence number assigned by the log service
    pub seq: u64,
    /// Records still to be delivered for the requested filter.
    ///
    /// Present only on historical feeds whose filter is not the catch-all `>`.
    pub delta: Option<u64>,
    /// Cluster the writer was connected to, when known
    pub origin_cluster: Option<String>,
    /// Operation tag
    pub operation: Operation,
}

impl Entry {
    /// True for tombstones
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Del
    }
}
