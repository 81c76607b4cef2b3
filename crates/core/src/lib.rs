//! Core types and traits for strata-kv
//!
//! This crate defines the foundational types shared by every layer:
//! - Error: the error taxonomy (`Error` for bucket operations, `LogError` for
//!   failures reported by the log service or the transport)
//! - Key: validation of keys, search keys and bucket names
//! - Codec: reversible per-token key transformation and value transformation
//! - Entry: the materialized view of one log record, with its `Operation` tag

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod entry;
pub mod error;
pub mod key;

pub use codec::{Base64KeyCodec, KeyCodec, KvCodecs, NoopCodec, ValueCodec};
pub use entry::{Entry, Operation, RecordMetadata, KV_OPERATION_HDR, KV_ORIGIN_CLUSTER_HDR};
pub use error::{Error, LogError, LogResult, Result};
pub use key::{
    has_wildcards, is_catch_all, validate_bucket_name, validate_key, validate_search_key,
    KEY_SEPARATOR, MATCH_ONE, MATCH_REST,
};
