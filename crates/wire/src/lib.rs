//! Log service protocol model for strata-kv
//!
//! This crate describes everything the key-value layer consumes from the
//! outside world, without implementing any of it:
//! - Headers: record metadata and protocol status lines
//! - Message: an inbound frame on a subscription, and its classification
//!   into data, flow-control, heartbeat or error
//! - Ack: metadata encoded in a delivery's reply subject
//! - Subject: wildcard subject matching
//! - Config: stream and consumer configuration and info types
//! - Service: the `LogService` and `Transport` collaborator traits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ack;
pub mod config;
pub mod headers;
pub mod message;
pub mod service;
pub mod subject;

pub use ack::{AckInfo, ACK_PAYLOAD};
pub use config::{
    AckPolicy, ConsumerConfig, ConsumerInfo, DeliverPolicy, DiscardPolicy, Placement, PubAck,
    PublishOptions, PurgeOptions, PurgeResponse, RetentionPolicy, StorageType, StoredMessage,
    StreamConfig, StreamInfo, StreamSource, StreamState,
};
pub use headers::{Headers, StatusLine};
pub use message::{Inbound, Message};
pub use service::{
    Closed, Connection, HandlerAction, LogService, MessageHandler, Subscription,
    SubscriptionControl, SubscriptionHandle, Transport,
};
pub use subject::subject_matches;
