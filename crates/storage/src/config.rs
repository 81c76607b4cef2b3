//! Configuration for the in-process log
//!
//! Controls the protocol traffic the log interleaves with deliveries, so
//! callers can exercise flow control and heartbeats deterministically.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of data records between flow-control requests
pub const DEFAULT_FLOW_CONTROL_EVERY: u64 = 256;

/// Default time a consumer may wait for a subscriber before it is removed
pub const DEFAULT_INACTIVE_THRESHOLD: Duration = Duration::from_secs(5);

/// In-process log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLogConfig {
    /// Cluster name reported by the transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Emit a flow-control request after this many data records on a
    /// flow-controlled consumer; delivery pauses until it is answered.
    /// 0 disables flow-control frames.
    pub flow_control_every: u64,

    /// Heartbeat interval for idle consumers. Overrides the interval a
    /// consumer asks for; `None` leaves it to the consumer configuration.
    #[serde(with = "millis", skip_serializing_if = "Option::is_none")]
    pub idle_heartbeat: Option<Duration>,

    /// How long a consumer waits for a subscription on its deliver subject
    /// before it is removed. Zero keeps unclaimed consumers until their
    /// stream is deleted.
    #[serde(with = "millis::required")]
    pub inactive_threshold: Duration,
}

impl Default for MemoryLogConfig {
    fn default() -> Self {
        Self {
            cluster: None,
            flow_control_every: DEFAULT_FLOW_CONTROL_EVERY,
            idle_heartbeat: None,
            inactive_threshold: DEFAULT_INACTIVE_THRESHOLD,
        }
    }
}

impl MemoryLogConfig {
    /// Set the reported cluster
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Set the flow-control cadence
    pub fn with_flow_control_every(mut self, every: u64) -> Self {
        self.flow_control_every = every;
        self
    }

    /// Set the heartbeat interval
    pub fn with_idle_heartbeat(mut self, interval: Duration) -> Self {
        self.idle_heartbeat = Some(interval);
        self
    }

    /// Set how long an unclaimed consumer is kept
    pub fn with_inactive_threshold(mut self, threshold: Duration) -> Self {
        self.inactive_threshold = threshold;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn to_millis(d: &Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&to_millis(d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }

    pub mod required {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_u64(super::to_millis(value))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
            Ok(Duration::from_millis(u64::deserialize(d)?))
        }
    }
}
