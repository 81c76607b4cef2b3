//! Push consumer cursors
//!
//! A consumer first replays a backlog fixed at creation (all matching
//! records, or the newest per subject), then follows records appended after
//! creation. Every delivery carries an ack reply subject encoding the
//! stream sequence, the consumer sequence and the number of records still
//! pending.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_kv_wire::{AckInfo, ConsumerConfig, ConsumerInfo, Message, StoredMessage};
use tokio::sync::Notify;

use crate::stream::StreamStore;

/// Delivery cursor of one ephemeral push consumer
#[derive(Debug)]
pub(crate) struct ConsumerState {
    pub(crate) name: String,
    pub(crate) stream: String,
    pub(crate) config: ConsumerConfig,
    created: DateTime<Utc>,
    backlog: VecDeque<u64>,
    live_floor: u64,
    cursor: u64,
    delivered: u64,
    initial_pending: u64,
    pub(crate) wake: Arc<Notify>,
}

impl ConsumerState {
    pub(crate) fn new(
        name: String,
        stream: &StreamStore,
        config: ConsumerConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let backlog = stream.backlog(config.deliver_policy, config.filter_subject.as_deref());
        let live_floor = stream.last_seq();
        Self {
            name,
            stream: stream.config().name.clone(),
            created: now,
            initial_pending: backlog.len() as u64,
            backlog,
            live_floor,
            cursor: 0,
            delivered: 0,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn info(&self) -> ConsumerInfo {
        ConsumerInfo {
            stream: self.stream.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
            num_pending: self.initial_pending,
            created: self.created,
        }
    }

    fn filter(&self) -> Option<&str> {
        self.config.filter_subject.as_deref()
    }

    /// Records still to be delivered after the current position
    pub(crate) fn pending(&self, stream: &StreamStore) -> u64 {
        let backlog = self
            .backlog
            .iter()
            .filter(|seq| stream.get(**seq).is_some())
            .count() as u64;
        backlog + stream.count_after(self.cursor.max(self.live_floor), self.filter())
    }

    /// Next delivery, if a record is available
    pub(crate) fn next(&mut self, stream: &StreamStore) -> Option<Message> {
        while let Some(seq) = self.backlog.pop_front() {
            if let Some(msg) = stream.get(seq) {
                let msg = msg.clone();
                return Some(self.deliver(msg, stream));
            }
        }
        let after = self.cursor.max(self.live_floor);
        let msg = stream.next_after(after, self.filter())?.clone();
        Some(self.deliver(msg, stream))
    }

    fn deliver(&mut self, msg: StoredMessage, stream: &StreamStore) -> Message {
        self.cursor = msg.seq;
        self.delivered += 1;
        let ack = AckInfo {
            domain: None,
            account_hash: None,
            stream: self.stream.clone(),
            consumer: self.name.clone(),
            delivered: 1,
            stream_seq: msg.seq,
            consumer_seq: self.delivered,
            timestamp_nanos: msg.time.timestamp_nanos_opt().unwrap_or_default(),
            pending: self.pending(stream),
        };
        Message {
            subject: msg.subject,
            reply: Some(ack.reply_subject()),
            headers: msg.headers,
            data: msg.data,
        }
    }
}
