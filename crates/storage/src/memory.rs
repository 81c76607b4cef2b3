//! In-process log service and transport
//!
//! `MemoryLog` implements both collaborator traits over shared in-memory
//! state, so a [`Connection`] built from it behaves like a connection to a
//! single-node log server:
//! - appends land in whichever stream captures the subject
//! - each consumer runs a push task that delivers to the subscription bound
//!   to its deliver subject, interleaving flow-control requests and idle
//!   heartbeats
//! - ack and flow-control replies published on the transport are routed
//!   back to the log
//!
//! # Thread Safety
//!
//! All state sits behind one `parking_lot::Mutex`; the lock is never held
//! across an await point or while a subscription handler runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use strata_kv_core::{LogError, LogResult};
use strata_kv_wire::headers::{
    CONSUMER_STALLED_HDR, FLOW_CONTROL_DESCRIPTION, IDLE_HEARTBEAT_DESCRIPTION,
    PENDING_MESSAGES_HDR, STATUS_CONTROL,
};
use strata_kv_wire::{
    subject_matches, Closed, Connection, ConsumerConfig, ConsumerInfo, HandlerAction, Headers,
    LogService, Message, MessageHandler, PubAck, PublishOptions, PurgeOptions, PurgeResponse,
    StoredMessage, StreamConfig, StreamInfo, Subscription, SubscriptionControl,
    SubscriptionHandle, Transport,
};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::MemoryLogConfig;
use crate::consumer::ConsumerState;
use crate::stream::StreamStore;

const ACK_PREFIX: &str = "$JS.ACK.";
const FLOW_CONTROL_PREFIX: &str = "$JS.FC.";

/// Status code sent on a consumer whose stream or cursor disappeared
const STATUS_CONSUMER_DELETED: u16 = 409;

/// Closure state shared between a subscription task and its handles
struct SubscriptionSignal {
    cancel: watch::Sender<bool>,
    failure: Mutex<Option<LogError>>,
    closed: AtomicBool,
}

impl SubscriptionSignal {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel,
            failure: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn fail(&self, error: LogError) {
        self.failure.lock().get_or_insert(error);
        self.cancel.send_replace(true);
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn outcome(&self) -> LogResult<()> {
        match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.send_replace(true);
    }
}

impl SubscriptionControl for SubscriptionSignal {
    fn unsubscribe(&self) {
        self.cancel.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || *self.cancel.borrow()
    }
}

struct SubscriptionEntry {
    subject: String,
    inbox: mpsc::UnboundedSender<Message>,
    signal: Arc<SubscriptionSignal>,
}

/// Where a push task sends its frames
struct Target {
    subject: String,
    inbox: mpsc::UnboundedSender<Message>,
    signal: Arc<SubscriptionSignal>,
}

impl Target {
    fn send(&self, msg: Message) -> bool {
        self.inbox.send(msg).is_ok()
    }

    fn control(&self, description: &str, reply: Option<String>) -> Message {
        Message {
            subject: self.subject.clone(),
            reply,
            headers: Headers::with_status(STATUS_CONTROL, description),
            data: Bytes::new(),
        }
    }
}

enum Step {
    Deliver(Message),
    Idle { pending: u64 },
    Gone,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamStore>,
    consumers: HashMap<String, ConsumerState>,
    subscriptions: HashMap<u64, SubscriptionEntry>,
    flow_waiters: HashMap<String, Arc<Notify>>,
}

impl State {
    fn consumer_count(&self, stream: &str) -> usize {
        self.consumers
            .values()
            .filter(|c| c.stream == stream)
            .count()
    }

    fn remove_consumers(&mut self, stream: &str) -> usize {
        let names: Vec<String> = self
            .consumers
            .values()
            .filter(|c| c.stream == stream)
            .map(|c| c.name.clone())
            .collect();
        for name in &names {
            if let Some(consumer) = self.consumers.remove(name) {
                consumer.wake.notify_one();
            }
        }
        names.len()
    }
}

struct Inner {
    config: MemoryLogConfig,
    state: Mutex<State>,
    next_sid: AtomicU64,
    acks: AtomicU64,
    flow_control_responses: AtomicU64,
    interest: watch::Sender<u64>,
}

/// In-process log service and transport
///
/// Cloning is cheap and yields a handle to the same log.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(MemoryLogConfig::default())
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl MemoryLog {
    /// Create an empty log
    pub fn new(config: MemoryLogConfig) -> Self {
        let (interest, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                next_sid: AtomicU64::new(1),
                acks: AtomicU64::new(0),
                flow_control_responses: AtomicU64::new(0),
                interest,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &MemoryLogConfig {
        &self.inner.config
    }

    /// Connection using this log for both management and messaging
    pub fn connection(&self) -> Connection {
        Connection::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    /// Acknowledgments received so far
    pub fn acks(&self) -> u64 {
        self.inner.acks.load(Ordering::SeqCst)
    }

    /// Flow-control requests answered so far
    pub fn flow_control_responses(&self) -> u64 {
        self.inner.flow_control_responses.load(Ordering::SeqCst)
    }

    /// Names of existing streams
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state.lock().streams.keys().cloned().collect();
        names.sort();
        names
    }

    /// Live consumers on a stream
    pub fn consumer_count(&self, stream: &str) -> usize {
        self.inner.state.lock().consumer_count(stream)
    }

    /// Close every live subscription abnormally with a transport error
    pub fn fail_subscriptions(&self, reason: &str) {
        let state = self.inner.state.lock();
        for entry in state.subscriptions.values() {
            entry.signal.fail(LogError::Transport(reason.to_string()));
        }
    }

    /// Delete every consumer of a stream; their subscriptions receive a
    /// `409 Consumer Deleted` status frame
    pub fn delete_consumers(&self, stream: &str) -> usize {
        self.inner.state.lock().remove_consumers(stream)
    }

    fn notify_interest(&self) {
        self.inner.interest.send_modify(|n| *n = n.wrapping_add(1));
    }

    fn heartbeat_interval(&self, config: &ConsumerConfig) -> Option<Duration> {
        self.inner.config.idle_heartbeat.or(config.idle_heartbeat)
    }

    /// Wait until a subscription exists on the deliver subject
    ///
    /// Returns `None` if the consumer is deleted before anyone subscribes,
    /// or is removed after waiting longer than the inactive threshold.
    async fn await_interest(&self, name: &str, deliver: &str, wake: &Notify) -> Option<Target> {
        let threshold = self.inner.config.inactive_threshold;
        let deadline = (!threshold.is_zero()).then(|| Instant::now() + threshold);
        loop {
            let mut interest = self.inner.interest.subscribe();
            {
                let state = self.inner.state.lock();
                let bound = state
                    .subscriptions
                    .values()
                    .find(|s| !s.signal.is_closed() && subject_matches(&s.subject, deliver));
                if let Some(entry) = bound {
                    return Some(Target {
                        subject: deliver.to_string(),
                        inbox: entry.inbox.clone(),
                        signal: entry.signal.clone(),
                    });
                }
                if !state.consumers.contains_key(name) {
                    return None;
                }
            }
            tokio::select! {
                _ = interest.changed() => {}
                _ = wake.notified() => {}
                _ = expire(deadline) => {
                    self.inner.state.lock().consumers.remove(name);
                    debug!(
                        target: "strata::log",
                        consumer = %name,
                        ?threshold,
                        "unclaimed consumer removed"
                    );
                    return None;
                }
            }
        }
    }

    async fn push(self, stream: String, name: String, config: ConsumerConfig, wake: Arc<Notify>) {
        let Some(target) = self
            .await_interest(&name, &config.deliver_subject, &wake)
            .await
        else {
            return;
        };
        // a missing stream is reported as a deleted consumer below
        let appended = self
            .inner
            .state
            .lock()
            .streams
            .get(&stream)
            .map(StreamStore::subscribe);
        let mut appended = appended.unwrap_or_else(|| watch::channel(0).1);

        let heartbeat = self.heartbeat_interval(&config);
        let every = if config.flow_control {
            self.inner.config.flow_control_every
        } else {
            0
        };
        let mut since_flow_control = 0u64;
        let mut flow_requests = 0u64;

        loop {
            if target.signal.is_closed() {
                break;
            }
            let step = {
                let mut state = self.inner.state.lock();
                let State {
                    streams, consumers, ..
                } = &mut *state;
                match (consumers.get_mut(&name), streams.get_mut(&stream)) {
                    (Some(consumer), Some(store)) => {
                        store.expire(Utc::now());
                        match consumer.next(store) {
                            Some(msg) => Step::Deliver(msg),
                            None => Step::Idle {
                                pending: consumer.pending(store),
                            },
                        }
                    }
                    _ => Step::Gone,
                }
            };

            match step {
                Step::Deliver(msg) => {
                    if !target.send(msg) {
                        break;
                    }
                    if every == 0 {
                        continue;
                    }
                    since_flow_control += 1;
                    if since_flow_control >= every {
                        since_flow_control = 0;
                        flow_requests += 1;
                        let reply = format!("{FLOW_CONTROL_PREFIX}{stream}.{name}.{flow_requests}");
                        if !self.flow_control(&target, reply, heartbeat, &wake).await {
                            break;
                        }
                    }
                }
                Step::Idle { pending } => {
                    tokio::select! {
                        _ = target.signal.cancelled() => break,
                        _ = appended.changed() => {}
                        _ = wake.notified() => {}
                        _ = idle(heartbeat) => {
                            trace!(
                                target: "strata::log",
                                consumer = %name,
                                pending,
                                "idle heartbeat"
                            );
                            let mut frame = target.control(IDLE_HEARTBEAT_DESCRIPTION, None);
                            frame.headers.insert(PENDING_MESSAGES_HDR, pending.to_string());
                            if !target.send(frame) {
                                break;
                            }
                        }
                    }
                }
                Step::Gone => {
                    debug!(target: "strata::log", consumer = %name, "consumer deleted");
                    target.send(Message {
                        subject: target.subject.clone(),
                        reply: None,
                        headers: Headers::with_status(STATUS_CONSUMER_DELETED, "Consumer Deleted"),
                        data: Bytes::new(),
                    });
                    target.signal.cancelled().await;
                    break;
                }
            }
        }

        self.inner.state.lock().consumers.remove(&name);
        debug!(target: "strata::log", consumer = %name, "push consumer finished");
    }

    /// Send a flow-control request and wait for its answer
    ///
    /// Returns false if the subscription ended while waiting.
    async fn flow_control(
        &self,
        target: &Target,
        reply: String,
        heartbeat: Option<Duration>,
        wake: &Notify,
    ) -> bool {
        let answered = Arc::new(Notify::new());
        self.inner
            .state
            .lock()
            .flow_waiters
            .insert(reply.clone(), answered.clone());

        trace!(target: "strata::log", subject = %reply, "flow control request");
        let sent = target.send(target.control(FLOW_CONTROL_DESCRIPTION, Some(reply.clone())));
        let released = sent
            && loop {
                tokio::select! {
                    _ = answered.notified() => break true,
                    _ = wake.notified() => break true,
                    _ = target.signal.cancelled() => break false,
                    _ = idle(heartbeat) => {
                        let mut frame = target.control(IDLE_HEARTBEAT_DESCRIPTION, None);
                        frame.headers.insert(CONSUMER_STALLED_HDR, reply.clone());
                        if !target.send(frame) {
                            break false;
                        }
                    }
                }
            };
        self.inner.state.lock().flow_waiters.remove(&reply);
        released
    }
}

async fn idle(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl LogService for MemoryLog {
    async fn stream_info(&self, stream: &str) -> LogResult<StreamInfo> {
        let mut state = self.inner.state.lock();
        let consumers = state.consumer_count(stream);
        let store = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| LogError::StreamNotFound(stream.to_string()))?;
        store.expire(Utc::now());
        Ok(store.info(consumers))
    }

    async fn add_stream(&self, config: StreamConfig) -> LogResult<StreamInfo> {
        let mut state = self.inner.state.lock();
        let consumers = state.consumer_count(&config.name);
        if let Some(existing) = state.streams.get(&config.name) {
            if existing.config() == &config {
                return Ok(existing.info(consumers));
            }
            return Err(LogError::StreamNameInUse(config.name));
        }
        info!(
            target: "strata::log",
            stream = %config.name,
            subjects = ?config.subjects,
            "stream created"
        );
        let store = StreamStore::new(config.clone(), Utc::now());
        let info = store.info(0);
        state.streams.insert(config.name, store);
        Ok(info)
    }

    async fn publish(
        &self,
        subject: &str,
        data: Bytes,
        headers: Headers,
        options: PublishOptions,
    ) -> LogResult<PubAck> {
        let mut state = self.inner.state.lock();
        let store = state
            .streams
            .values_mut()
            .find(|s| s.captures(subject))
            .ok_or_else(|| LogError::NoStreamForSubject(subject.to_string()))?;
        let now = Utc::now();
        store.expire(now);
        let seq = store.append(subject, data, headers, options, now)?;
        trace!(target: "strata::log", subject, seq, "appended");
        Ok(PubAck {
            stream: store.config().name.clone(),
            seq,
            duplicate: false,
        })
    }

    async fn last_message_for_subject(
        &self,
        stream: &str,
        subject: &str,
    ) -> LogResult<StoredMessage> {
        let mut state = self.inner.state.lock();
        let store = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| LogError::StreamNotFound(stream.to_string()))?;
        store.expire(Utc::now());
        store
            .last_for_subject(subject)
            .cloned()
            .ok_or(LogError::NoMessageFound)
    }

    async fn purge_stream(
        &self,
        stream: &str,
        options: PurgeOptions,
    ) -> LogResult<PurgeResponse> {
        let mut state = self.inner.state.lock();
        let store = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| LogError::StreamNotFound(stream.to_string()))?;
        let purged = store.purge(&options);
        info!(target: "strata::log", stream, purged, "stream purged");
        Ok(PurgeResponse {
            success: true,
            purged,
        })
    }

    async fn delete_stream(&self, stream: &str) -> LogResult<bool> {
        let mut state = self.inner.state.lock();
        if state.streams.remove(stream).is_none() {
            return Err(LogError::StreamNotFound(stream.to_string()));
        }
        let consumers = state.remove_consumers(stream);
        info!(target: "strata::log", stream, consumers, "stream deleted");
        Ok(true)
    }

    async fn add_consumer(
        &self,
        stream: &str,
        config: ConsumerConfig,
    ) -> LogResult<ConsumerInfo> {
        let (info, wake) = {
            let mut state = self.inner.state.lock();
            let store = state
                .streams
                .get_mut(stream)
                .ok_or_else(|| LogError::StreamNotFound(stream.to_string()))?;
            let now = Utc::now();
            store.expire(now);
            let name = uuid::Uuid::new_v4().simple().to_string();
            let consumer = ConsumerState::new(name.clone(), store, config.clone(), now);
            let info = consumer.info();
            let wake = consumer.wake.clone();
            state.consumers.insert(name, consumer);
            (info, wake)
        };

        debug!(
            target: "strata::log",
            stream,
            consumer = %info.name,
            filter = ?config.filter_subject,
            pending = info.num_pending,
            "consumer created"
        );
        tokio::spawn(
            self.clone()
                .push(stream.to_string(), info.name.clone(), config, wake),
        );
        Ok(info)
    }
}

#[async_trait]
impl Transport for MemoryLog {
    async fn subscribe(
        &self,
        subject: &str,
        mut handler: MessageHandler,
    ) -> LogResult<Subscription> {
        let (inbox, mut rx) = mpsc::unbounded_channel::<Message>();
        let signal = Arc::new(SubscriptionSignal::new());
        let sid = self.inner.next_sid.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().subscriptions.insert(
            sid,
            SubscriptionEntry {
                subject: subject.to_string(),
                inbox,
                signal: signal.clone(),
            },
        );
        self.notify_interest();
        trace!(target: "strata::log", sid, subject, "subscribed");

        let (closed_tx, closed) = Closed::channel();
        let log = self.clone();
        let task_signal = signal.clone();
        tokio::spawn(async move {
            let result = loop {
                tokio::select! {
                    biased;
                    _ = task_signal.cancelled() => break task_signal.outcome(),
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if handler(msg) == HandlerAction::Unsubscribe {
                                break Ok(());
                            }
                        }
                        None => break Ok(()),
                    },
                }
            };
            task_signal.mark_closed();
            log.inner.state.lock().subscriptions.remove(&sid);
            log.notify_interest();
            trace!(target: "strata::log", sid, ok = result.is_ok(), "subscription closed");
            let _ = closed_tx.send(result);
        });

        Ok(Subscription::new(
            SubscriptionHandle::new(sid, subject, signal),
            closed,
        ))
    }

    fn publish(&self, subject: &str, data: Bytes) -> LogResult<()> {
        if subject.starts_with(ACK_PREFIX) {
            self.inner.acks.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut state = self.inner.state.lock();
        if subject.starts_with(FLOW_CONTROL_PREFIX) {
            if let Some(waiter) = state.flow_waiters.remove(subject) {
                self.inner
                    .flow_control_responses
                    .fetch_add(1, Ordering::SeqCst);
                waiter.notify_one();
            }
            return Ok(());
        }

        for entry in state.subscriptions.values() {
            if subject_matches(&entry.subject, subject) {
                let _ = entry.inbox.send(Message::new(subject, data.clone()));
            }
        }
        Ok(())
    }

    fn cluster(&self) -> Option<String> {
        self.inner.config.cluster.clone()
    }
}
