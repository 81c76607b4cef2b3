//! Delivery metadata carried in ack reply subjects
//!
//! Every data record delivered to a push consumer has a reply subject that
//! both identifies where to send the acknowledgment and encodes delivery
//! metadata:
//!
//! ```text
//! $JS.ACK.<stream>.<consumer>.<delivered>.<sseq>.<dseq>.<ts>.<pending>
//! $JS.ACK.<domain>.<acc>.<stream>.<consumer>.<delivered>.<sseq>.<dseq>.<ts>.<pending>.<token>
//! ```
//!
//! `pending` is the number of records still to be delivered on the consumer
//! after this one; it is the authoritative end-of-replay signal.

use chrono::{DateTime, TimeZone, Utc};

/// Payload of a positive acknowledgment
pub const ACK_PAYLOAD: &[u8] = b"+ACK";

const ACK_PREFIX: &str = "$JS.ACK";

/// Parsed ack reply subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckInfo {
    /// Domain, when the reply uses the extended form and names one
    pub domain: Option<String>,
    /// Account hash, extended form only
    pub account_hash: Option<String>,
    /// Stream name
    pub stream: String,
    /// Consumer name
    pub consumer: String,
    /// How many times this record has been delivered
    pub delivered: u64,
    /// Stream sequence of the record
    pub stream_seq: u64,
    /// Consumer sequence of the delivery
    pub consumer_seq: u64,
    /// Store time in nanoseconds since the epoch
    pub timestamp_nanos: i64,
    /// Records still pending on the consumer after this one
    pub pending: u64,
}

impl AckInfo {
    /// Parse an ack reply subject; `None` if it is not one
    pub fn parse(reply: &str) -> Option<Self> {
        let tokens: Vec<&str> = reply.split('.').collect();
        if tokens.len() < 2 || tokens[0] != "$JS" || tokens[1] != "ACK" {
            return None;
        }
        let (domain, account_hash, rest) = match tokens.len() {
            9 => (None, None, &tokens[2..]),
            n if n >= 12 => {
                let domain = Some(tokens[2])
                    .filter(|d| *d != "_")
                    .map(str::to_string);
                (domain, Some(tokens[3].to_string()), &tokens[4..11])
            }
            _ => return None,
        };
        Some(Self {
            domain,
            account_hash,
            stream: rest[0].to_string(),
            consumer: rest[1].to_string(),
            delivered: rest[2].parse().ok()?,
            stream_seq: rest[3].parse().ok()?,
            consumer_seq: rest[4].parse().ok()?,
            timestamp_nanos: rest[5].parse().ok()?,
            pending: rest[6].parse().ok()?,
        })
    }

    /// Render the short (nine token) reply subject
    pub fn reply_subject(&self) -> String {
        format!(
            "{ACK_PREFIX}.{}.{}.{}.{}.{}.{}.{}",
            self.stream,
            self.consumer,
            self.delivered,
            self.stream_seq,
            self.consumer_seq,
            self.timestamp_nanos,
            self.pending
        )
    }

    /// Store time of the record
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.timestamp_nanos)
    }
}
