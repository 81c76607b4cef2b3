//! Inbound frames on a subscription
//!
//! A push subscription interleaves three kinds of traffic: data records,
//! control frames (flow-control requests and idle heartbeats) and in-band
//! errors. [`Message::classify`] tells them apart.

use bytes::Bytes;
use strata_kv_core::LogError;

use crate::headers::{
    Headers, CONSUMER_STALLED_HDR, FLOW_CONTROL_DESCRIPTION, IDLE_HEARTBEAT_DESCRIPTION,
    PENDING_MESSAGES_HDR, STATUS_CONTROL,
};

/// A frame delivered to a subscription handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the frame was published on (the record's subject for data)
    pub subject: String,
    /// Subject to answer on, if any
    pub reply: Option<String>,
    /// Headers and status line
    pub headers: Headers,
    /// Payload
    pub data: Bytes,
}

/// Classification of an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Flow-control request; must be answered, never surfaced
    FlowControl,
    /// Idle heartbeat; answered when stalled, never surfaced
    Heartbeat,
    /// Application record
    Data,
    /// In-band protocol error
    Error(LogError),
}

impl Message {
    /// Plain message without headers
    pub fn new(subject: impl Into<String>, data: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: Headers::new(),
            data,
        }
    }

    /// Classify the frame
    ///
    /// Status codes of 300 and above are errors. Status 100 frames are
    /// flow-control or heartbeat frames depending on their description.
    /// Everything else is data.
    pub fn classify(&self) -> Inbound {
        let Some(status) = self.headers.status() else {
            return Inbound::Data;
        };
        if status.code >= 300 {
            return Inbound::Error(LogError::Status {
                code: status.code,
                description: status.description.clone(),
            });
        }
        if status.code == STATUS_CONTROL && self.data.is_empty() {
            if status.description.starts_with(FLOW_CONTROL_DESCRIPTION) {
                return Inbound::FlowControl;
            }
            if status.description.starts_with(IDLE_HEARTBEAT_DESCRIPTION) {
                return Inbound::Heartbeat;
            }
        }
        Inbound::Data
    }

    /// True for flow-control requests
    pub fn is_flow_control(&self) -> bool {
        self.classify() == Inbound::FlowControl
    }

    /// True for idle heartbeats
    pub fn is_heartbeat(&self) -> bool {
        self.classify() == Inbound::Heartbeat
    }

    /// Subject a stalled consumer waits on, carried by heartbeats
    pub fn stalled_subject(&self) -> Option<&str> {
        self.headers.get(CONSUMER_STALLED_HDR)
    }

    /// Records the consumer still has to deliver, as reported by a heartbeat
    pub fn pending_messages(&self) -> Option<u64> {
        self.headers.get(PENDING_MESSAGES_HDR)?.parse().ok()
    }
}
