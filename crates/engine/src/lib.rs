//! Key-value buckets over a subject-addressed log
//!
//! This crate implements the key-value layer:
//! - Bucket: create/put/get/delete/purge/destroy/status against a stream
//! - Feed: `history` and `watch` change feeds, and `keys` enumeration
//! - Watch: the cancelable queue a feed delivers into
//! - Config: `BucketOptions`, loadable from TOML
//!
//! All I/O goes through a `strata_kv_wire::Connection`; any implementation
//! of its `LogService` and `Transport` traits can back a bucket.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod config;
pub mod feed;
pub mod namespace;
pub mod watch;

pub use bucket::{Bucket, KvStatus, PutOptions};
pub use config::{BucketOptions, CONFIG_FILE_NAME, MAX_HISTORY};
pub use feed::{WatchOptions, REPLAY_IDLE_HEARTBEAT};
pub use namespace::{KV_STREAM_PREFIX, KV_SUBJECT_PREFIX};
pub use watch::{FeedState, Watch};
