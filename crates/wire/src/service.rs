//! Collaborator interfaces consumed by the key-value layer
//!
//! Two seams exist:
//! - [`LogService`]: request/response management and append operations
//!   against streams and consumers.
//! - [`Transport`]: subject-based messaging. Subscriptions deliver frames
//!   to a handler callback and report their closure exactly once.
//!
//! Both are object safe so a [`Connection`] can hold any implementation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use strata_kv_core::{LogError, LogResult};
use tokio::sync::oneshot;

use crate::config::{
    ConsumerConfig, ConsumerInfo, PubAck, PublishOptions, PurgeOptions, PurgeResponse,
    StoredMessage, StreamConfig, StreamInfo,
};
use crate::headers::Headers;
use crate::message::Message;

/// Stream and consumer management plus appends
#[async_trait]
pub trait LogService: Send + Sync {
    /// Describe a stream; `StreamNotFound` if it does not exist
    async fn stream_info(&self, stream: &str) -> LogResult<StreamInfo>;

    /// Create a stream. Creating one that already exists with an identical
    /// configuration is a no-op returning its info.
    async fn add_stream(&self, config: StreamConfig) -> LogResult<StreamInfo>;

    /// Append a record to whichever stream captures `subject`
    async fn publish(
        &self,
        subject: &str,
        data: Bytes,
        headers: Headers,
        options: PublishOptions,
    ) -> LogResult<PubAck>;

    /// Newest record stored for an exact subject
    async fn last_message_for_subject(
        &self,
        stream: &str,
        subject: &str,
    ) -> LogResult<StoredMessage>;

    /// Remove records from a stream
    async fn purge_stream(&self, stream: &str, options: PurgeOptions)
        -> LogResult<PurgeResponse>;

    /// Delete a stream and all its records
    async fn delete_stream(&self, stream: &str) -> LogResult<bool>;

    /// Create an ephemeral push consumer
    async fn add_consumer(&self, stream: &str, config: ConsumerConfig)
        -> LogResult<ConsumerInfo>;
}

/// What a handler wants after processing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Keep delivering
    Continue,
    /// Stop the subscription; no further frames will be delivered
    Unsubscribe,
}

/// Callback invoked for every frame, serially, on the transport's task
pub type MessageHandler = Box<dyn FnMut(Message) -> HandlerAction + Send>;

/// Transport-side control of a live subscription
pub trait SubscriptionControl: Send + Sync {
    /// Request termination; idempotent
    fn unsubscribe(&self);

    /// Whether the subscription has stopped delivering
    fn is_closed(&self) -> bool;
}

/// Cloneable handle to a subscription
#[derive(Clone)]
pub struct SubscriptionHandle {
    sid: u64,
    subject: String,
    control: Arc<dyn SubscriptionControl>,
}

impl SubscriptionHandle {
    /// Wrap a transport-side control
    pub fn new(
        sid: u64,
        subject: impl Into<String>,
        control: Arc<dyn SubscriptionControl>,
    ) -> Self {
        Self {
            sid,
            subject: subject.into(),
            control,
        }
    }

    /// Transport-assigned subscription id
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Subscribed subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Request termination; idempotent
    pub fn unsubscribe(&self) {
        self.control.unsubscribe();
    }

    /// Whether the subscription has stopped delivering
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolves once when a subscription ends
///
/// `Ok(())` for a requested unsubscribe, `Err` when the transport ended the
/// subscription abnormally.
#[derive(Debug)]
pub struct Closed(oneshot::Receiver<LogResult<()>>);

impl Closed {
    /// Pair a closure notifier with its receiving side
    pub fn channel() -> (oneshot::Sender<LogResult<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    /// Wait for the subscription to end
    pub async fn wait(self) -> LogResult<()> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(LogError::Transport(
                "subscription dropped without reporting closure".to_string(),
            )),
        }
    }
}

/// A live subscription: a control handle plus its closure signal
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    closed: Closed,
}

impl Subscription {
    /// Assemble a subscription
    pub fn new(handle: SubscriptionHandle, closed: Closed) -> Self {
        Self { handle, closed }
    }

    /// Control handle
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Split into the handle and the closure signal
    pub fn into_parts(self) -> (SubscriptionHandle, Closed) {
        (self.handle, self.closed)
    }
}

/// Subject-based messaging
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to a subject; `handler` runs for every frame until it
    /// returns [`HandlerAction::Unsubscribe`] or the subscription closes
    async fn subscribe(&self, subject: &str, handler: MessageHandler)
        -> LogResult<Subscription>;

    /// Fire-and-forget publish of a plain message
    fn publish(&self, subject: &str, data: Bytes) -> LogResult<()>;

    /// Fresh unique inbox subject
    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", uuid::Uuid::new_v4().simple())
    }

    /// Cluster this connection is attached to, if known
    fn cluster(&self) -> Option<String>;
}

/// A log service plus the transport it is reached over
#[derive(Clone)]
pub struct Connection {
    log: Arc<dyn LogService>,
    transport: Arc<dyn Transport>,
}

impl Connection {
    /// Bundle the two collaborators
    pub fn new(log: Arc<dyn LogService>, transport: Arc<dyn Transport>) -> Self {
        Self { log, transport }
    }

    /// Management and append API
    pub fn log(&self) -> &Arc<dyn LogService> {
        &self.log
    }

    /// Messaging API
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cluster", &self.transport.cluster())
            .finish()
    }
}
