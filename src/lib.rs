//! strata-kv - Key-value buckets over an ordered, append-only log
//!
//! A bucket maps keys to subjects of a log stream: writes are appends,
//! reads resolve to the last record of a key's subject, and change feeds
//! replay or follow those records through an ephemeral consumer.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_kv::{Bucket, BucketOptions, MemoryLog, WatchOptions};
//!
//! let log = MemoryLog::default();
//! let bucket = Bucket::create(log.connection(), "profiles", BucketOptions::default()).await?;
//!
//! let seq = bucket.put("users.alice", "admin").await?;
//! let entry = bucket.get("users.alice").await?;
//!
//! let mut watch = bucket.watch(WatchOptions::key("users.*")).await?;
//! while let Some(entry) = watch.next().await? {
//!     println!("{} = {:?}", entry.key, entry.value);
//! }
//! ```
//!
//! # Architecture
//!
//! - `strata-kv-core`: errors, key validation, codecs, entries
//! - `strata-kv-wire`: protocol model and the `LogService`/`Transport` traits
//! - `strata-kv-storage`: `MemoryLog`, an in-process implementation
//! - `strata-kv-engine`: `Bucket`, change feeds and key enumeration

pub use strata_kv_core::*;
pub use strata_kv_engine::*;
pub use strata_kv_storage::{MemoryLog, MemoryLogConfig};
pub use strata_kv_wire::{
    Connection, LogService, PurgeOptions, PurgeResponse, StorageType, Transport,
};
