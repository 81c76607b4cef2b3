//! Record headers and protocol status lines
//!
//! Headers are an ordered multimap with case-insensitive names. Protocol
//! frames (flow control, heartbeats, in-band errors) additionally carry a
//! status line: a numeric code plus a description.
//!
//! The two reserved KV headers are exposed through the typed
//! [`RecordMetadata`] view rather than free-form lookups.

use serde::{Deserialize, Serialize};
use strata_kv_core::{Operation, RecordMetadata, KV_OPERATION_HDR, KV_ORIGIN_CLUSTER_HDR};

/// Header naming the subject to answer when a consumer is stalled on flow control
pub const CONSUMER_STALLED_HDR: &str = "Nats-Consumer-Stalled";

/// Header on idle heartbeats carrying the consumer's remaining pending count
pub const PENDING_MESSAGES_HDR: &str = "Nats-Pending-Messages";

/// Status code for control frames (flow control and heartbeats)
pub const STATUS_CONTROL: u16 = 100;

/// Description prefix of flow-control frames
pub const FLOW_CONTROL_DESCRIPTION: &str = "FlowControl Request";

/// Description prefix of heartbeat frames
pub const IDLE_HEARTBEAT_DESCRIPTION: &str = "Idle Heartbeat";

/// Status line carried by protocol frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    /// Numeric status
    pub code: u16,
    /// Human readable description
    pub description: String,
}

/// Ordered, case-insensitive header map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    status: Option<StatusLine>,
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header set
    pub fn new() -> Self {
        Self::default()
    }

    /// Header set carrying only a status line
    pub fn with_status(code: u16, description: impl Into<String>) -> Self {
        Self {
            status: Some(StatusLine {
                code,
                description: description.into(),
            }),
            entries: Vec::new(),
        }
    }

    /// Set a header, replacing any existing values for the name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Add a value without removing existing ones
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for a name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a name
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status line, if any
    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    /// Status code, if any
    pub fn code(&self) -> Option<u16> {
        self.status.as_ref().map(|s| s.code)
    }

    /// True when no status and no headers are present
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Approximate encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.entries
            .iter()
            .map(|(n, v)| n.len() + v.len() + 4)
            .sum()
    }

    /// Typed view of the reserved KV headers
    ///
    /// An absent or empty origin cluster reads as `None`.
    pub fn record_metadata(&self) -> RecordMetadata {
        RecordMetadata {
            origin_cluster: self
                .get(KV_ORIGIN_CLUSTER_HDR)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            operation: Operation::from_tag(self.get(KV_OPERATION_HDR)),
        }
    }
}

impl From<&RecordMetadata> for Headers {
    fn from(meta: &RecordMetadata) -> Self {
        let mut headers = Headers::new();
        headers.insert(
            KV_ORIGIN_CLUSTER_HDR,
            meta.origin_cluster.clone().unwrap_or_default(),
        );
        if meta.operation == Operation::Del {
            headers.insert(KV_OPERATION_HDR, Operation::Del.as_str());
        }
        headers
    }
}
