//! Bucket store
//!
//! A `Bucket` is a key-value namespace backed 1:1 by a log stream. Writes
//! are appends to the key's subject; reads resolve to the last record
//! stored for that subject. Every request/response call is bounded by the
//! bucket's timeout.
//!
//! A `Bucket` is cheap to clone and may be shared between tasks: it holds
//! only its name, codecs and connection.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_kv_core::{
    validate_bucket_name, Entry, Error, KvCodecs, LogError, LogResult, RecordMetadata, Result,
};
use strata_kv_wire::{
    Connection, DiscardPolicy, Headers, Placement, PublishOptions, PurgeOptions, PurgeResponse,
    RetentionPolicy, StorageType, StreamConfig, StreamSource,
};
use tracing::{debug, info};

use crate::config::BucketOptions;
use crate::namespace::{Namespace, KV_STREAM_PREFIX};

/// Options for a single put
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Only write if the key's last sequence equals this value; `Some(0)`
    /// requires the key to have no records
    pub previous_seq: Option<u64>,
}

impl PutOptions {
    /// Condition the write on the key's last sequence
    pub fn previous_seq(seq: u64) -> Self {
        Self {
            previous_seq: Some(seq),
        }
    }
}

/// Snapshot of a bucket's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvStatus {
    /// Bucket name
    pub bucket: String,
    /// Backing stream name
    pub stream: String,
    /// Records currently stored, tombstones and history included
    pub values: u64,
    /// Bytes currently stored
    pub bytes: u64,
    /// Versions retained per key
    pub history: u64,
    /// Value time-to-live
    pub ttl: Option<Duration>,
    /// Cluster the connection is attached to
    pub cluster: Option<String>,
    /// Storage kind of the backing stream
    pub backing_store: StorageType,
}

/// A key-value bucket
#[derive(Clone)]
pub struct Bucket {
    name: String,
    stream: String,
    pub(crate) ns: Namespace,
    timeout: Duration,
    pub(crate) conn: Connection,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("stream", &self.stream)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Bucket {
    /// Open a bucket, creating its backing stream if it does not exist
    ///
    /// An existing stream is used as is; its configuration is not changed.
    ///
    /// # Errors
    ///
    /// `InvalidBucketName` or `InvalidConfig` before any call is made; log
    /// service failures other than "stream not found" are passed through.
    pub async fn create(conn: Connection, name: &str, options: BucketOptions) -> Result<Self> {
        validate_bucket_name(name)?;
        options.validate()?;

        let bucket = Bucket {
            name: name.to_string(),
            stream: options
                .stream_name
                .clone()
                .unwrap_or_else(|| format!("{KV_STREAM_PREFIX}{name}")),
            ns: Namespace::new(name, options.resolve_codecs()?),
            timeout: options.timeout(),
            conn,
        };

        match bucket
            .request("stream info", bucket.conn.log().stream_info(&bucket.stream))
            .await
        {
            Ok(_) => {
                debug!(
                    target: "strata::kv",
                    bucket = %bucket.name,
                    stream = %bucket.stream,
                    "opened existing bucket"
                );
            }
            Err(Error::Log(LogError::StreamNotFound(_))) => {
                let config = bucket.stream_config(&options);
                bucket
                    .request("add stream", bucket.conn.log().add_stream(config))
                    .await?;
                info!(
                    target: "strata::kv",
                    bucket = %bucket.name,
                    stream = %bucket.stream,
                    history = options.history,
                    "created bucket"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(bucket)
    }

    fn stream_config(&self, options: &BucketOptions) -> StreamConfig {
        StreamConfig {
            name: self.stream.clone(),
            subjects: vec![self.ns.bucket_subjects()],
            retention: RetentionPolicy::Limits,
            max_msgs_per_subject: options.history,
            max_bytes: options.max_bucket_size,
            max_msg_size: options.max_value_size,
            storage: StorageType::File,
            discard: DiscardPolicy::Old,
            num_replicas: options.replicas,
            max_age: options.ttl(),
            placement: options
                .placement_cluster
                .clone()
                .map(|cluster| Placement { cluster }),
            mirror: options.mirror_bucket.as_ref().map(|bucket| StreamSource {
                name: format!("{KV_STREAM_PREFIX}{bucket}"),
            }),
        }
    }

    /// Run a log call under the bucket's deadline
    pub(crate) async fn request<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = LogResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    /// Bucket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing stream name
    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    /// Codecs applied to keys and values
    pub fn codecs(&self) -> &KvCodecs {
        self.ns.codecs()
    }

    /// Request deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write a value; returns the sequence assigned to the record
    pub async fn put(&self, key: &str, value: impl Into<Bytes>) -> Result<u64> {
        self.put_with_options(key, value, PutOptions::default()).await
    }

    /// Write a value under a precondition
    ///
    /// # Errors
    ///
    /// A `SequenceMismatch` from the log is passed through untouched when
    /// `previous_seq` is not the key's last sequence.
    pub async fn put_with_options(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<u64> {
        let subject = self.ns.key_subject(key)?;
        let data = self.ns.codecs().value.encode(value.into());
        self.append(
            "put",
            &subject,
            data,
            RecordMetadata::put(self.conn.transport().cluster()),
            options.previous_seq,
        )
        .await
    }

    /// Latest entry for a key; `None` if the key was never written
    ///
    /// A deleted key returns its tombstone.
    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let subject = self.ns.key_subject(key)?;
        let result = self
            .request(
                "get",
                self.conn
                    .log()
                    .last_message_for_subject(&self.stream, &subject),
            )
            .await;
        match result {
            Ok(msg) => Ok(Some(self.ns.entry_from_stored(key, msg)?)),
            Err(Error::Log(LogError::NoMessageFound)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a tombstone for a key; returns its sequence
    ///
    /// Earlier records of the key are kept, subject to history limits.
    pub async fn delete(&self, key: &str) -> Result<u64> {
        let subject = self.ns.key_subject(key)?;
        self.append(
            "delete",
            &subject,
            Bytes::new(),
            RecordMetadata::delete(self.conn.transport().cluster()),
            None,
        )
        .await
    }

    async fn append(
        &self,
        operation: &'static str,
        subject: &str,
        data: Bytes,
        meta: RecordMetadata,
        previous_seq: Option<u64>,
    ) -> Result<u64> {
        let options = PublishOptions {
            expected_last_subject_seq: previous_seq,
        };
        let ack = self
            .request(
                operation,
                self.conn
                    .log()
                    .publish(subject, data, Headers::from(&meta), options),
            )
            .await?;
        debug!(
            target: "strata::kv",
            bucket = %self.name,
            subject,
            seq = ack.seq,
            op = %meta.operation,
            "appended"
        );
        Ok(ack.seq)
    }

    /// Remove historical records from the backing stream
    pub async fn purge(&self, options: PurgeOptions) -> Result<PurgeResponse> {
        let response = self
            .request("purge", self.conn.log().purge_stream(&self.stream, options))
            .await?;
        info!(target: "strata::kv", bucket = %self.name, purged = response.purged, "purged bucket");
        Ok(response)
    }

    /// Delete the backing stream and everything in it
    pub async fn destroy(&self) -> Result<bool> {
        let deleted = self
            .request("destroy", self.conn.log().delete_stream(&self.stream))
            .await?;
        info!(target: "strata::kv", bucket = %self.name, stream = %self.stream, "destroyed bucket");
        Ok(deleted)
    }

    /// Current record count and configuration of the bucket
    pub async fn status(&self) -> Result<KvStatus> {
        let info = self
            .request("status", self.conn.log().stream_info(&self.stream))
            .await?;
        Ok(KvStatus {
            bucket: self.name.clone(),
            stream: self.stream.clone(),
            values: info.state.messages,
            bytes: info.state.bytes,
            history: info.config.max_msgs_per_subject,
            ttl: info.config.max_age,
            cluster: self.conn.transport().cluster(),
            backing_store: info.config.storage,
        })
    }
}
