//! Subject naming for a bucket
//!
//! A bucket `b` is backed by stream `KV_b` and owns the subjects
//! `$KV.b.<key>`, where `<key>` is the per-token encoded key with wildcard
//! tokens left literal. This module maps keys to subjects and records back
//! to entries.

use strata_kv_core::{
    is_catch_all, validate_key, validate_search_key, Entry, Error, KvCodecs, LogError, Result,
};
use strata_kv_wire::{AckInfo, Message, StoredMessage};

/// Prefix of backing stream names
pub const KV_STREAM_PREFIX: &str = "KV_";

/// Root token of bucket subjects
pub const KV_SUBJECT_PREFIX: &str = "$KV";

/// Key ↔ subject mapping and record conversion for one bucket
#[derive(Debug, Clone)]
pub(crate) struct Namespace {
    bucket: String,
    prefix: String,
    codecs: KvCodecs,
}

impl Namespace {
    pub(crate) fn new(bucket: &str, codecs: KvCodecs) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: format!("{KV_SUBJECT_PREFIX}.{bucket}."),
            codecs,
        }
    }

    pub(crate) fn codecs(&self) -> &KvCodecs {
        &self.codecs
    }

    /// Wildcard subject capturing every key of the bucket
    pub(crate) fn bucket_subjects(&self) -> String {
        format!("{}>", self.prefix)
    }

    /// Subject of a plain key; the encoded key must pass validation
    pub(crate) fn key_subject(&self, key: &str) -> Result<String> {
        let encoded = self.codecs.encode_key(key);
        validate_key(&encoded)?;
        Ok(format!("{}{}", self.prefix, encoded))
    }

    /// Filter subject for a search key
    pub(crate) fn filter_subject(&self, search_key: &str) -> Result<String> {
        validate_search_key(search_key)?;
        Ok(format!("{}{}", self.prefix, self.codecs.encode_key(search_key)))
    }

    /// Decoded key of a record subject
    pub(crate) fn key_of(&self, subject: &str) -> Result<String> {
        let encoded = subject.strip_prefix(&self.prefix).ok_or_else(|| {
            Error::Log(LogError::Protocol(format!(
                "subject {subject} is outside bucket {}",
                self.bucket
            )))
        })?;
        self.codecs.decode_key(encoded)
    }

    /// Entry for a record fetched by key
    pub(crate) fn entry_from_stored(&self, key: &str, msg: StoredMessage) -> Result<Entry> {
        let meta = msg.headers.record_metadata();
        Ok(Entry {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            value: self.codecs.value.decode(msg.data)?,
            created: msg.time,
            seq: msg.seq,
            delta: None,
            origin_cluster: meta.origin_cluster,
            operation: meta.operation,
        })
    }

    /// Entry for a record delivered to a feed, plus its delivery metadata
    ///
    /// `delta` is filled from the pending count when `historical` is set and
    /// `search_key` is not the catch-all.
    pub(crate) fn entry_from_delivery(
        &self,
        msg: &Message,
        search_key: &str,
        historical: bool,
    ) -> Result<(Entry, AckInfo)> {
        let ack = msg
            .reply
            .as_deref()
            .and_then(AckInfo::parse)
            .ok_or_else(|| {
                Error::Log(LogError::Protocol(format!(
                    "delivery on {} has no ack metadata",
                    msg.subject
                )))
            })?;
        let meta = msg.headers.record_metadata();
        let delta = (historical && !is_catch_all(search_key)).then_some(ack.pending);
        let entry = Entry {
            bucket: self.bucket.clone(),
            key: self.key_of(&msg.subject)?,
            value: self.codecs.value.decode(msg.data.clone())?,
            created: ack.timestamp(),
            seq: ack.stream_seq,
            delta,
            origin_cluster: meta.origin_cluster,
            operation: meta.operation,
        };
        Ok((entry, ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use strata_kv_core::{Operation, RecordMetadata};
    use strata_kv_wire::Headers;

    fn delivery(subject: &str, reply: &str, meta: &RecordMetadata) -> Message {
        Message {
            subject: subject.to_string(),
            reply: Some(reply.to_string()),
            headers: Headers::from(meta),
            data: Bytes::from_static(b"v"),
        }
    }

    #[test]
    fn test_subjects() {
        let ns = Namespace::new("b", KvCodecs::noop());
        assert_eq!(ns.bucket_subjects(), "$KV.b.>");
        assert_eq!(ns.key_subject("a.b").unwrap(), "$KV.b.a.b");
        assert_eq!(ns.filter_subject("a.*").unwrap(), "$KV.b.a.*");
        assert!(ns.key_subject("a.*").is_err());
        assert!(ns.filter_subject("a.>.c").is_err());
    }

    #[test]
    fn test_wildcards_stay_literal_under_encoding() {
        let ns = Namespace::new("b", KvCodecs::base64_keys());
        let filter = ns.filter_subject("x.*.>").unwrap();
        assert!(filter.ends_with(".*.>"));
        assert!(!filter.contains(".x."));
    }

    #[test]
    fn test_key_of_round_trips_encoding() {
        let ns = Namespace::new("b", KvCodecs::base64_keys());
        let subject = ns.key_subject("users.alice").unwrap();
        assert_eq!(ns.key_of(&subject).unwrap(), "users.alice");
        assert!(ns.key_of("$KV.other.x").is_err());
    }

    #[test]
    fn test_entry_from_delivery_delta() {
        let ns = Namespace::new("b", KvCodecs::noop());
        let msg = delivery(
            "$KV.b.k",
            "$JS.ACK.KV_b.c.1.9.3.1700000000000000000.4",
            &RecordMetadata::delete(Some("east".into())),
        );

        let (entry, ack) = ns.entry_from_delivery(&msg, "k", true).unwrap();
        assert_eq!(entry.key, "k");
        assert_eq!(entry.seq, 9);
        assert_eq!(entry.delta, Some(4));
        assert_eq!(entry.operation, Operation::Del);
        assert_eq!(entry.origin_cluster.as_deref(), Some("east"));
        assert_eq!(ack.pending, 4);

        let (entry, _) = ns.entry_from_delivery(&msg, ">", true).unwrap();
        assert_eq!(entry.delta, None);
        let (entry, _) = ns.entry_from_delivery(&msg, "k", false).unwrap();
        assert_eq!(entry.delta, None);
    }

    #[test]
    fn test_entry_from_delivery_requires_ack_reply() {
        let ns = Namespace::new("b", KvCodecs::noop());
        let mut msg = delivery("$KV.b.k", "_INBOX.x", &RecordMetadata::put(None));
        assert!(ns.entry_from_delivery(&msg, "k", false).is_err());
        msg.reply = None;
        assert!(ns.entry_from_delivery(&msg, "k", false).is_err());
    }

    #[test]
    fn test_empty_origin_cluster_reads_as_none() {
        let ns = Namespace::new("b", KvCodecs::noop());
        let msg = delivery(
            "$KV.b.k",
            "$JS.ACK.KV_b.c.1.1.1.0.0",
            &RecordMetadata::put(None),
        );
        let (entry, _) = ns.entry_from_delivery(&msg, "k", false).unwrap();
        assert_eq!(entry.origin_cluster, None);
        assert_eq!(entry.operation, Operation::Put);
    }
}
