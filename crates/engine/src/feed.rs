//! Change feeds: `history`, `watch` and `keys`
//!
//! Each call creates its own ephemeral push consumer filtered to the
//! requested keys, subscribes to the consumer's deliver subject and turns
//! inbound frames into entries:
//! - flow-control requests and heartbeats are answered, never surfaced
//! - data records are converted, enqueued, then acknowledged
//! - status errors terminate the feed
//!
//! History replays exactly the records pending when the consumer was
//! created, or stops early once the log reports nothing left pending (records
//! purged or expired before delivery). Keys stops when the log reports
//! nothing left pending.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strata_kv_core::{Error, LogResult, Result, MATCH_REST};
use strata_kv_wire::{
    AckPolicy, ConsumerConfig, ConsumerInfo, DeliverPolicy, HandlerAction, Inbound, Message,
    MessageHandler, SubscriptionHandle, Transport, ACK_PAYLOAD,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::bucket::Bucket;
use crate::namespace::Namespace;
use crate::watch::{FeedSink, Watch};

/// Heartbeat interval requested by `history` and `keys`
///
/// Heartbeats report the consumer's remaining pending count, which ends a
/// replay whose outstanding records were removed before delivery.
pub const REPLAY_IDLE_HEARTBEAT: Duration = Duration::from_millis(250);

/// Which keys a feed covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Key or search key; all keys when unset
    pub key: Option<String>,
}

impl WatchOptions {
    /// Feed restricted to a key or search key
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    fn search_key(&self) -> &str {
        self.key.as_deref().unwrap_or(MATCH_REST)
    }
}

/// Answer a control frame
///
/// Flow-control requests are answered on their reply subject; a heartbeat
/// reporting a stalled consumer is answered on the subject it names.
fn answer_control(transport: &dyn Transport, msg: &Message) -> LogResult<()> {
    trace!(target: "strata::kv::watch", subject = %msg.subject, "control frame");
    if let Some(reply) = msg.reply.as_deref() {
        transport.publish(reply, Bytes::new())?;
    }
    if let Some(stalled) = msg.stalled_subject() {
        transport.publish(stalled, Bytes::new())?;
    }
    Ok(())
}

fn acknowledge(transport: &dyn Transport, msg: &Message) -> LogResult<()> {
    match msg.reply.as_deref() {
        Some(reply) => transport.publish(reply, Bytes::from_static(ACK_PAYLOAD)),
        None => Ok(()),
    }
}

/// Subscription handler feeding a [`Watch`]
struct FeedHandler {
    ns: Namespace,
    search_key: String,
    historical: bool,
    bound: Option<u64>,
    sink: FeedSink,
    transport: Arc<dyn Transport>,
}

impl FeedHandler {
    fn handle(&mut self, msg: Message) -> HandlerAction {
        match msg.classify() {
            Inbound::FlowControl | Inbound::Heartbeat => {
                if let Err(e) = answer_control(self.transport.as_ref(), &msg) {
                    return self.fail(e.into());
                }
                if self.historical && msg.is_heartbeat() && msg.pending_messages() == Some(0) {
                    return self.complete("nothing left to replay");
                }
                HandlerAction::Continue
            }
            Inbound::Error(e) => self.fail(e.into()),
            Inbound::Data => {
                let (entry, ack) = match self
                    .ns
                    .entry_from_delivery(&msg, &self.search_key, self.historical)
                {
                    Ok(delivery) => delivery,
                    Err(e) => return self.fail(e),
                };
                let received = self.sink.push(entry);
                if let Err(e) = acknowledge(self.transport.as_ref(), &msg) {
                    return self.fail(e.into());
                }
                if self.bound == Some(received) {
                    return self.complete("history replay complete");
                }
                if self.historical && ack.pending == 0 {
                    return self.complete("nothing left to replay");
                }
                HandlerAction::Continue
            }
        }
    }

    fn complete(&self, reason: &'static str) -> HandlerAction {
        debug!(target: "strata::kv::watch", received = self.sink.received(), "{reason}");
        self.sink.stop(None);
        HandlerAction::Unsubscribe
    }

    fn fail(&self, error: Error) -> HandlerAction {
        self.sink.stop(Some(error));
        HandlerAction::Unsubscribe
    }
}

enum KeyEvent {
    Key(String),
    Done,
    Failed(Error),
    Closed(LogResult<()>),
}

/// Unsubscribes when dropped
struct SubscriptionGuard(SubscriptionHandle);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

impl Bucket {
    /// Replay the records currently stored for the requested keys
    ///
    /// The feed delivers exactly the records pending when it was created, in
    /// sequence order, then closes. Writes made during the replay are not
    /// included. Entries carry a `delta` counting the records still to come
    /// unless the feed covers all keys.
    pub async fn history(&self, options: WatchOptions) -> Result<Watch> {
        self.feed(options, true).await
    }

    /// Follow changes to the requested keys
    ///
    /// The feed first delivers the latest record of every matching key,
    /// then each subsequent write, until stopped or the subscription ends.
    pub async fn watch(&self, options: WatchOptions) -> Result<Watch> {
        self.feed(options, false).await
    }

    async fn consumer_on(
        &self,
        search_key: &str,
        deliver_policy: DeliverPolicy,
        idle_heartbeat: Option<Duration>,
    ) -> Result<ConsumerInfo> {
        let filter = self.ns.filter_subject(search_key)?;
        let config = ConsumerConfig {
            deliver_subject: self.conn.transport().new_inbox(),
            deliver_policy,
            ack_policy: AckPolicy::Explicit,
            filter_subject: Some(filter),
            flow_control: true,
            idle_heartbeat,
        };
        self.request(
            "add consumer",
            self.conn.log().add_consumer(self.stream_name(), config),
        )
        .await
    }

    async fn feed(&self, options: WatchOptions, historical: bool) -> Result<Watch> {
        let search_key = options.search_key().to_string();
        let info = if historical {
            self.consumer_on(&search_key, DeliverPolicy::All, Some(REPLAY_IDLE_HEARTBEAT))
                .await?
        } else {
            self.consumer_on(&search_key, DeliverPolicy::LastPerSubject, None)
                .await?
        };

        let bound = historical.then_some(info.num_pending);
        if bound == Some(0) {
            debug!(
                target: "strata::kv::watch",
                bucket = %self.name(),
                key = %search_key,
                "nothing to replay"
            );
            return Ok(Watch::finished());
        }

        let (mut watch, sink) = Watch::channel();
        let mut handler = FeedHandler {
            ns: self.ns.clone(),
            search_key: search_key.clone(),
            historical,
            bound,
            sink: sink.clone(),
            transport: self.conn.transport().clone(),
        };
        let handler: MessageHandler = Box::new(move |msg| handler.handle(msg));

        let deliver = &info.config.deliver_subject;
        let subscription = self
            .request("subscribe", self.conn.transport().subscribe(deliver, handler))
            .await?;
        let (handle, closed) = subscription.into_parts();
        watch.attach(handle);

        debug!(
            target: "strata::kv::watch",
            bucket = %self.name(),
            key = %search_key,
            historical,
            pending = info.num_pending,
            "feed started"
        );
        tokio::spawn(async move {
            match closed.wait().await {
                Ok(()) => sink.stop(None),
                Err(e) => sink.stop(Some(e.into())),
            }
        });
        Ok(watch)
    }

    /// Every key that currently has a record
    ///
    /// One key is returned per key subject, tombstoned keys included. The
    /// call resolves when the log reports no more records pending; an empty
    /// bucket resolves immediately.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let info = self
            .consumer_on(
                MATCH_REST,
                DeliverPolicy::LastPerSubject,
                Some(REPLAY_IDLE_HEARTBEAT),
            )
            .await?;
        if info.num_pending == 0 {
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ns = self.ns.clone();
        let transport = self.conn.transport().clone();
        let events = tx.clone();
        let handler: MessageHandler = Box::new(move |msg: Message| {
            let event = match msg.classify() {
                Inbound::FlowControl | Inbound::Heartbeat => {
                    match answer_control(transport.as_ref(), &msg) {
                        Ok(()) if msg.is_heartbeat() && msg.pending_messages() == Some(0) => {
                            KeyEvent::Done
                        }
                        Ok(()) => return HandlerAction::Continue,
                        Err(e) => KeyEvent::Failed(e.into()),
                    }
                }
                Inbound::Error(e) => KeyEvent::Failed(e.into()),
                Inbound::Data => match ns.entry_from_delivery(&msg, MATCH_REST, false) {
                    Ok((entry, ack)) => {
                        let _ = events.send(KeyEvent::Key(entry.key));
                        if let Err(e) = acknowledge(transport.as_ref(), &msg) {
                            KeyEvent::Failed(e.into())
                        } else if ack.pending == 0 {
                            KeyEvent::Done
                        } else {
                            return HandlerAction::Continue;
                        }
                    }
                    Err(e) => KeyEvent::Failed(e),
                },
            };
            let _ = events.send(event);
            HandlerAction::Unsubscribe
        });

        let deliver = &info.config.deliver_subject;
        let subscription = self
            .request("subscribe", self.conn.transport().subscribe(deliver, handler))
            .await?;
        let (handle, closed) = subscription.into_parts();
        let _guard = SubscriptionGuard(handle);
        tokio::spawn(async move {
            let _ = tx.send(KeyEvent::Closed(closed.wait().await));
        });

        let mut keys = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                KeyEvent::Key(key) => keys.push(key),
                KeyEvent::Done | KeyEvent::Closed(Ok(())) => break,
                KeyEvent::Failed(e) => return Err(e),
                KeyEvent::Closed(Err(e)) => return Err(e.into()),
            }
        }
        debug!(target: "strata::kv", bucket = %self.name(), keys = keys.len(), "listed keys");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_options_default_to_all_keys() {
        assert_eq!(WatchOptions::default().search_key(), ">");
        assert_eq!(WatchOptions::key("a.*").search_key(), "a.*");
    }
}
