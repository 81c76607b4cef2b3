//! Error types for strata-kv
//!
//! Two layers of errors exist:
//! - [`LogError`]: failures reported by the log service or the transport.
//!   These are passed through to callers verbatim.
//! - [`Error`]: everything a bucket operation can fail with, including a
//!   wrapped [`LogError`].
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for bucket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for log service and transport calls
pub type LogResult<T> = std::result::Result<T, LogError>;

/// Failures reported by the log service or the transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    /// The named stream does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// No record is stored for the requested subject
    #[error("no message found")]
    NoMessageFound,

    /// A conditional append found a different last sequence on the subject
    #[error("wrong last sequence: expected {expected}, found {actual}")]
    SequenceMismatch {
        /// Sequence the writer expected to be last
        expected: u64,
        /// Sequence actually last on the subject
        actual: u64,
    },

    /// Record payload is larger than the stream allows
    #[error("message size {size} exceeds maximum {max}")]
    MaxPayloadExceeded {
        /// Size of the rejected payload
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// A stream with this name exists with a different configuration
    #[error("stream name already in use: {0}")]
    StreamNameInUse(String),

    /// No stream captures the subject being appended to
    #[error("no stream matches subject: {0}")]
    NoStreamForSubject(String),

    /// The consumer does not exist (or no longer exists)
    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),

    /// In-band status error delivered on a subscription
    #[error("status {code}: {description}")]
    Status {
        /// Status code carried by the protocol frame
        code: u16,
        /// Human readable status description
        description: String,
    },

    /// A frame could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Error types for bucket operations
#[derive(Debug, Error)]
pub enum Error {
    /// Bucket name contains characters outside `[-\w]`
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// Key or search key rejected by validation
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A key or value codec could not decode its input
    #[error("codec error: {0}")]
    Codec(String),

    /// Bucket options are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request/response call did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out
        operation: &'static str,
        /// The deadline that elapsed
        after: Duration,
    },

    /// Failure reported by the log service or transport
    #[error(transparent)]
    Log(#[from] LogError),
}

impl Error {
    /// True if a conditional put lost its precondition
    pub fn is_sequence_mismatch(&self) -> bool {
        matches!(self, Error::Log(LogError::SequenceMismatch { .. }))
    }

    /// True if a request/response call timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
